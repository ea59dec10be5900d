//! Shopify Admin GraphQL backend
//!
//! One POST per call against `https://{store}/admin/api/{version}/graphql.json`.
//! Rate limiting and retries are applied by the caller; this client only maps
//! transport, HTTP and GraphQL failures onto [`RemoteError`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

use crate::application::backend::{CatalogBackend, SnapshotPage};
use crate::domain::delta::{ChangedField, DesiredProduct, RemoteProduct};
use crate::domain::errors::RemoteError;
use crate::domain::product::{ExternalKey, ProductStatus};
use crate::infrastructure::config::SyncConfig;

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

const PRODUCTS_QUERY: &str = r"
query getProducts($first: Int!, $cursor: String) {
    products(first: $first, after: $cursor) {
        edges {
            node {
                id
                title
                productType
                status
                variants(first: 5) {
                    edges { node { id sku price inventoryQuantity } }
                }
            }
        }
        pageInfo { hasNextPage endCursor }
    }
}";

const CREATE_MUTATION: &str = r"
mutation createProduct($input: ProductInput!) {
    productCreate(input: $input) {
        product { id }
        userErrors { field message }
    }
}";

const UPDATE_MUTATION: &str = r"
mutation updateProduct($input: ProductInput!) {
    productUpdate(input: $input) {
        product { id }
        userErrors { field message }
    }
}";

static META_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<meta[^>]*>").expect("valid regex"));
static EMPTY_PARAGRAPH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<p>\s*(<i></i>)?\s*(&nbsp;)?\s*</p>").expect("valid regex")
});
static EMPTY_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<i>\s*</i>").expect("valid regex"));
static GENERATOR_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"generatedBy="[^"]*""#).expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip editor residue from a feed description before it becomes the body HTML
pub fn clean_html(html: &str) -> String {
    let html = META_TAG.replace_all(html, "");
    let html = EMPTY_PARAGRAPH.replace_all(&html, "");
    let html = EMPTY_ITALIC.replace_all(&html, "");
    let html = GENERATOR_ATTR.replace_all(&html, "");
    let html = WHITESPACE.replace_all(&html, " ");
    let html = html.trim();
    if html == "<p></p>" {
        String::new()
    } else {
        html.to_string()
    }
}

/// Map an HTTP status (and its headers) to an error, `None` for success
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> Option<RemoteError> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => RemoteError::Throttled {
            retry_after: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Authentication(message),
        s if s.is_server_error() => RemoteError::Server {
            status: s.as_u16(),
            message,
        },
        _ => RemoteError::Rejected(message),
    })
}

/// Inspect top-level GraphQL `errors`; throttling is transient, anything else is a rejection
pub fn classify_graphql_errors(body: &Value) -> Option<RemoteError> {
    let errors = body.get("errors")?.as_array().filter(|e| !e.is_empty())?;

    let throttled = errors.iter().any(|error| {
        error.pointer("/extensions/code").and_then(Value::as_str) == Some("THROTTLED")
    });
    if throttled {
        return Some(RemoteError::Throttled { retry_after: None });
    }

    let messages: Vec<&str> = errors
        .iter()
        .filter_map(|error| error.get("message").and_then(Value::as_str))
        .collect();
    Some(RemoteError::Rejected(messages.join("; ")))
}

/// `userErrors` of a mutation payload as a rejection
fn check_user_errors(data: &Value, operation: &str) -> Result<(), RemoteError> {
    let user_errors = data
        .pointer(&format!("/{operation}/userErrors"))
        .and_then(Value::as_array);
    match user_errors {
        Some(errors) if !errors.is_empty() => {
            let messages: Vec<String> = errors
                .iter()
                .map(|error| {
                    let field = error.get("field").map(ToString::to_string).unwrap_or_default();
                    let message = error.get("message").and_then(Value::as_str).unwrap_or("");
                    format!("{field} {message}").trim().to_string()
                })
                .collect();
            Err(RemoteError::Rejected(messages.join("; ")))
        }
        _ => Ok(()),
    }
}

fn map_transport_error(error: &reqwest::Error) -> RemoteError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        RemoteError::Connectivity(error.to_string())
    } else {
        RemoteError::Protocol(error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ProductsData {
    products: ProductConnection,
}

#[derive(Debug, Deserialize)]
struct ProductConnection {
    edges: Vec<Edge<ProductNode>>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProductNode {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "productType", default)]
    product_type: String,
    #[serde(default)]
    status: String,
    variants: Connection<VariantNode>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    edges: Vec<Edge<T>>,
}

#[derive(Debug, Deserialize)]
struct VariantNode {
    id: String,
    sku: Option<String>,
    price: Option<Decimal>,
    #[serde(rename = "inventoryQuantity")]
    inventory_quantity: Option<i64>,
}

fn remote_status(raw: &str) -> ProductStatus {
    if raw.eq_ignore_ascii_case("ACTIVE") {
        ProductStatus::Active
    } else {
        ProductStatus::Draft
    }
}

/// Flatten a products page; every variant with a SKU becomes one remote product
fn parse_products_page(data: Value) -> Result<SnapshotPage, RemoteError> {
    let data: ProductsData = serde_json::from_value(data)
        .map_err(|e| RemoteError::Protocol(format!("unexpected products payload: {e}")))?;

    let mut products = Vec::new();
    for Edge { node: product } in data.products.edges {
        for Edge { node: variant } in product.variants.edges {
            let Some(key) = variant.sku.as_deref().and_then(ExternalKey::new) else {
                continue;
            };
            products.push(RemoteProduct {
                product_id: product.id.clone(),
                variant_id: Some(variant.id),
                key,
                title: product.title.clone(),
                price: variant.price.unwrap_or_default(),
                inventory_quantity: variant.inventory_quantity.unwrap_or(0),
                status: remote_status(&product.status),
                product_type: product.product_type.clone(),
            });
        }
    }

    let page_info = data.products.page_info;
    let next_cursor = if page_info.has_next_page {
        Some(page_info.end_cursor.ok_or_else(|| {
            RemoteError::Protocol("hasNextPage without endCursor".into())
        })?)
    } else {
        None
    };

    Ok(SnapshotPage {
        products,
        next_cursor,
    })
}

fn tags(product: &DesiredProduct) -> Vec<String> {
    vec![
        product.category.handle.clone(),
        format!("confidence:{}", product.confidence.as_str()),
        format!("source:{}", product.source),
    ]
}

/// Store-wide fields set only when a product is created
#[derive(Debug, Clone, Default)]
struct CreateDefaults {
    vendor: Option<String>,
    image_base_url: Option<String>,
}

impl CreateDefaults {
    fn from_config(config: &SyncConfig) -> Self {
        let non_blank = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
        };
        Self {
            vendor: non_blank(config.vendor.as_deref()),
            image_base_url: non_blank(config.image_base_url.as_deref()),
        }
    }

    fn image_url(&self, product: &DesiredProduct) -> Option<String> {
        self.image_base_url
            .as_deref()
            .map(|base| format!("{}/{}.jpg", base.trim_end_matches('/'), product.key()))
    }
}

fn create_input(product: &DesiredProduct, defaults: &CreateDefaults) -> Value {
    let mut variant = json!({
        "sku": product.key().as_str(),
        "price": product.price().to_string(),
        "inventoryPolicy": "DENY",
    });
    if let Some(barcode) = &product.record.barcode {
        variant["barcode"] = json!(barcode);
    }
    if let Some(weight) = product.record.weight_kg {
        variant["weight"] = json!(weight);
        variant["weightUnit"] = json!("KILOGRAMS");
    }

    let mut input = json!({
        "title": product.title,
        "descriptionHtml": clean_html(&product.description),
        "productType": product.product_type(),
        "tags": tags(product),
        "status": product.status().as_remote_str(),
        "variants": [variant],
    });
    if let Some(vendor) = &defaults.vendor {
        input["vendor"] = json!(vendor);
    }
    if let Some(src) = defaults.image_url(product) {
        input["images"] = json!([{ "src": src }]);
    }
    input
}

fn update_input(
    remote: &RemoteProduct,
    product: &DesiredProduct,
    changed: &BTreeSet<ChangedField>,
) -> Value {
    let mut input = json!({
        "id": remote.product_id,
        "title": product.title,
        "descriptionHtml": clean_html(&product.description),
        "productType": product.product_type(),
        "tags": tags(product),
        "status": product.status().as_remote_str(),
    });
    if changed.contains(&ChangedField::Price) {
        if let Some(variant_id) = &remote.variant_id {
            input["variants"] = json!([{ "id": variant_id, "price": product.price().to_string() }]);
        }
    }
    input
}

pub struct ShopifyClient {
    client: Client,
    endpoint: String,
    create_defaults: CreateDefaults,
}

impl ShopifyClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("catalog-sync/{}", env!("CARGO_PKG_VERSION")))
                .context("Invalid user agent")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut token =
            HeaderValue::from_str(config.access_token.trim()).context("Invalid access token")?;
        token.set_sensitive(true);
        headers.insert(ACCESS_TOKEN_HEADER, token);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = format!(
            "https://{}/admin/api/{}/graphql.json",
            config.store_domain.trim().trim_end_matches('/'),
            config.api_version
        );

        Ok(Self {
            client,
            endpoint,
            create_defaults: CreateDefaults::from_config(config),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST a GraphQL document and return its `data` object
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, RemoteError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| map_transport_error(&e))?;

        if let Some(error) = classify_status(status, &headers, &body) {
            return Err(error);
        }

        let body: Value = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Protocol(format!("invalid JSON response: {e}")))?;
        if let Some(error) = classify_graphql_errors(&body) {
            return Err(error);
        }

        body.get("data")
            .cloned()
            .filter(|data| !data.is_null())
            .ok_or_else(|| RemoteError::Protocol("response has no data".into()))
    }
}

#[async_trait]
impl CatalogBackend for ShopifyClient {
    async fn fetch_snapshot_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SnapshotPage, RemoteError> {
        let data = self
            .graphql(PRODUCTS_QUERY, json!({ "first": page_size, "cursor": cursor }))
            .await?;
        parse_products_page(data)
    }

    async fn create_product(&self, product: &DesiredProduct) -> Result<String, RemoteError> {
        let data = self
            .graphql(CREATE_MUTATION, json!({ "input": create_input(product, &self.create_defaults) }))
            .await?;
        check_user_errors(&data, "productCreate")?;

        let id = data
            .pointer("/productCreate/product/id")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Protocol("productCreate returned no product".into()))?;
        debug!("✅ created {} as {}", product.key(), id);
        Ok(id.to_string())
    }

    async fn update_product(
        &self,
        remote: &RemoteProduct,
        desired: &DesiredProduct,
        changed: &BTreeSet<ChangedField>,
    ) -> Result<(), RemoteError> {
        let data = self
            .graphql(
                UPDATE_MUTATION,
                json!({ "input": update_input(remote, desired, changed) }),
            )
            .await?;
        check_user_errors(&data, "productUpdate")
    }

    async fn archive_product(&self, remote: &RemoteProduct) -> Result<(), RemoteError> {
        let data = self
            .graphql(
                UPDATE_MUTATION,
                json!({ "input": { "id": remote.product_id, "status": ProductStatus::Draft.as_remote_str() } }),
            )
            .await?;
        check_user_errors(&data, "productUpdate")
    }
}
