//! End-to-end runs against the in-memory catalog, from files on disk

use catalog_sync_lib::application::sync_pipeline::{RunMode, SyncPipeline};
use catalog_sync_lib::domain::dispatch::DispatchState;
use catalog_sync_lib::domain::errors::{RemoteError, SyncError};
use catalog_sync_lib::infrastructure::config::AppConfig;
use catalog_sync_lib::infrastructure::report_writer::{
    FAILED_DISPATCH_FILE, NEEDS_REVIEW_FILE, REJECTED_FILE, SKIPPED_FILE, SUMMARY_FILE,
};
use catalog_sync_lib::test_utils::{InMemoryCatalog, remote};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const RULES: &str = r#"{
  "settings": {
    "global_part_keywords": ["gasket", "o-ring"],
    "skip_patterns": {
      "max_price_threshold": 0.05,
      "title_patterns_en": ["do not use"],
      "title_patterns_fr": ["ne pas utiliser"]
    }
  },
  "categories": [
    {"productType": "Parts > Motors & Electrical", "handle": "motors", "title": "Motors",
     "priority": 100, "keywords_en": ["motor"], "keywords_fr": ["moteur"]},
    {"productType": "Equipment > Floor Machines", "handle": "floor-machines", "title": "Floor Machines",
     "priority": 50, "keywords_en": ["floor machine"], "exclusions_en": ["motor"]},
    {"productType": "Parts > Springs", "handle": "springs", "title": "Springs",
     "priority": 90, "keywords_en": ["spring"], "min_products": 5}
  ]
}"#;

const FEED: &str = "SKU;ProductTitleEN;ProductTitleFR;ProductDescriptionEN;ProductDescriptionFR;RegularPrice;Inventory;weight;upc
M1;Motor Assembly 120V;Assemblage moteur;;;45.00;10;2.5;111
M2;Fan;Ventilateur;Replacement motor;;30.00;0;;
F1;Floor Machine 175 RPM;;;;999.00;2;40;
S1;Spring small;;;;1.00;5;;
S2;Spring large;;;;1.50;5;;
S3;Return spring;;;;2.00;5;;
G1;Door gasket;Joint;;;3.00;4;;
X1;Mystery item;;;;5.00;1;;
P1;Placeholder;;;;0.01;1;;
P2;Old part - DO NOT USE;;;;10.00;1;;
;No key;;;;1.00;1;;
M1;Duplicate motor;;;;1.00;1;;
B1;Bad price;;;;n/a;1;;";

struct Fixture {
    dir: TempDir,
    catalog: Arc<InMemoryCatalog>,
}

impl Fixture {
    fn new(catalog: InMemoryCatalog) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rules.json"), RULES).unwrap();
        std::fs::write(dir.path().join("feed.csv"), FEED).unwrap();
        Self {
            dir,
            catalog: Arc::new(catalog),
        }
    }

    fn config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.paths.rules_path = self.dir.path().join("rules.json");
        config.paths.feed_source = Some(self.dir.path().join("feed.csv").to_string_lossy().into_owned());
        config.paths.report_dir = self.dir.path().join("reports");
        config.sync.rate_limit_per_second = 20;
        config
    }

    fn pipeline(&self, config: AppConfig) -> SyncPipeline {
        SyncPipeline::new(config, CancellationToken::new()).with_backend(self.catalog.clone())
    }

    fn report(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join("reports").join(name)).unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn full_run_classifies_reports_and_creates() {
    let fixture = Fixture::new(InMemoryCatalog::default());
    let result = fixture.pipeline(fixture.config()).run(RunMode::Sync).await.unwrap();
    let summary = &result.summary;

    assert_eq!(summary.records_ingested, 10);
    assert_eq!(summary.rows_rejected, 3);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.classified, 8);
    // three springs below min_products 5, plus the unmatched mystery item
    assert_eq!(summary.demoted, 3);
    assert_eq!(summary.needs_review, 4);
    assert_eq!(summary.per_category.get("Parts > Motors & Electrical"), Some(&2));
    assert_eq!(summary.per_category.get("Equipment > Floor Machines"), Some(&1));

    let plan = summary.plan.unwrap();
    assert_eq!(plan.creates, 8);
    assert_eq!(plan.updates + plan.unchanged + plan.archives, 0);
    assert_eq!(summary.dispatch.unwrap().succeeded, 8);

    let needs_review = fixture.report(NEEDS_REVIEW_FILE);
    assert!(needs_review.contains("below_min_products:3/5"));
    assert!(needs_review.contains("X1,Mystery item"));
    assert_eq!(fixture.report(SKIPPED_FILE).lines().count(), 3);
    assert_eq!(fixture.report(REJECTED_FILE).lines().count(), 4);
    assert_eq!(fixture.report(FAILED_DISPATCH_FILE).lines().count(), 1);

    let json: serde_json::Value = serde_json::from_str(&fixture.report(SUMMARY_FILE)).unwrap();
    assert_eq!(json["mode"], "sync");
    assert_eq!(json["plan"]["creates"], 8);
}

#[tokio::test(start_paused = true)]
async fn second_run_against_same_catalog_is_a_no_op() {
    let fixture = Fixture::new(InMemoryCatalog::default());
    fixture.pipeline(fixture.config()).run(RunMode::Sync).await.unwrap();
    let created = fixture.catalog.mutation_calls().len();

    let second = fixture.pipeline(fixture.config()).run(RunMode::Sync).await.unwrap();
    let plan = second.summary.plan.unwrap();
    assert_eq!(plan.creates, 0);
    assert_eq!(plan.updates, 0);
    assert_eq!(plan.unchanged, 8);
    assert_eq!(fixture.catalog.mutation_calls().len(), created);
}

#[tokio::test(start_paused = true)]
async fn untitled_record_is_created_under_its_key_and_then_left_alone() {
    let fixture = Fixture::new(InMemoryCatalog::default());
    std::fs::write(
        fixture.dir.path().join("feed.csv"),
        "SKU;ProductTitleEN;ProductTitleFR;ProductDescriptionEN;ProductDescriptionFR;RegularPrice;Inventory;weight;upc\n\
         U1;;;;;12.00;3;;\n",
    )
    .unwrap();

    let first = fixture.pipeline(fixture.config()).run(RunMode::Sync).await.unwrap();
    assert_eq!(first.summary.plan.unwrap().creates, 1);
    let products = fixture.catalog.snapshot_products();
    assert_eq!(products[0].title, "U1");

    let second = fixture.pipeline(fixture.config()).run(RunMode::Sync).await.unwrap();
    let plan = second.summary.plan.unwrap();
    assert_eq!((plan.creates, plan.updates, plan.unchanged), (0, 0, 1));
    assert_eq!(fixture.catalog.mutation_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn changed_remote_fields_become_updates_and_missing_are_archived() {
    let fixture = Fixture::new(InMemoryCatalog::with_products(vec![
        // remote is out of stock, feed has 10 in stock
        remote("M1", "Motor Assembly 120V", "45.00", 0, "Parts > Motors & Electrical"),
        remote("GONE", "Discontinued", "9.00", 3, "Parts"),
    ]));
    let mut config = fixture.config();
    config.sync.archive_missing = true;

    let result = fixture.pipeline(config).run(RunMode::Sync).await.unwrap();
    let plan = result.summary.plan.unwrap();
    assert_eq!(plan.creates, 7);
    assert_eq!(plan.updates, 1);
    assert_eq!(plan.archives, 1);

    let products = fixture.catalog.snapshot_products();
    let gone = products.iter().find(|p| p.key.as_str() == "GONE").unwrap();
    assert_eq!(gone.status.as_remote_str(), "DRAFT");
    let m1: Vec<_> = products.iter().filter(|p| p.key.as_str() == "M1").collect();
    assert_eq!(m1.len(), 1);
    assert_eq!(m1[0].inventory_quantity, 10);
}

#[tokio::test(start_paused = true)]
async fn archive_is_opt_in() {
    let fixture = Fixture::new(InMemoryCatalog::with_products(vec![remote(
        "GONE", "Discontinued", "9.00", 3, "Parts",
    )]));
    let result = fixture.pipeline(fixture.config()).run(RunMode::Sync).await.unwrap();

    assert_eq!(result.summary.plan.unwrap().archives, 0);
    let gone = fixture.catalog.snapshot_products().into_iter().find(|p| p.key.as_str() == "GONE").unwrap();
    assert_eq!(gone.status.as_remote_str(), "ACTIVE");
}

#[tokio::test(start_paused = true)]
async fn rejected_mutation_is_reported_and_run_continues() {
    let fixture = Fixture::new(InMemoryCatalog::default());
    fixture
        .catalog
        .fail_key_with("F1", RemoteError::Rejected("weight must be positive".into()), 1);

    let result = fixture.pipeline(fixture.config()).run(RunMode::Sync).await.unwrap();
    let dispatch = result.summary.dispatch.unwrap();
    assert_eq!(dispatch.succeeded, 7);
    assert_eq!(dispatch.failed_permanent, 1);
    assert!(result.summary.has_failures());

    let report = fixture.report(FAILED_DISPATCH_FILE);
    assert!(report.contains("F1,create,failed_permanent,1,Rejected by remote: weight must be positive,Floor Machine 175 RPM"));
}

#[tokio::test(start_paused = true)]
async fn authentication_failure_aborts_the_run() {
    let fixture = Fixture::new(InMemoryCatalog::default());
    for key in ["M1", "M2", "F1", "S1", "S2", "S3", "G1", "X1"] {
        fixture
            .catalog
            .fail_key_with(key, RemoteError::Authentication("invalid token".into()), usize::MAX);
    }
    let mut config = fixture.config();
    config.sync.max_concurrency = 1;

    let result = fixture.pipeline(config).run(RunMode::Sync).await.unwrap();
    let report = result.dispatch.unwrap();
    assert!(report.aborted);
    assert_eq!(report.count(DispatchState::FailedPermanent), 1);
    assert_eq!(report.not_dispatched(), 7);
    assert_eq!(fixture.catalog.mutation_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unreadable_rules_stop_before_any_remote_call() {
    let fixture = Fixture::new(InMemoryCatalog::default());
    std::fs::write(fixture.dir.path().join("rules.json"), r#"{"categories": [{"handle": "x"}]}"#).unwrap();

    let err = fixture.pipeline(fixture.config()).run(RunMode::Sync).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::Config { .. })));
    assert!(fixture.catalog.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_snapshot_failure_is_retried_then_fatal() {
    let fixture = Fixture::new(InMemoryCatalog::default());
    fixture.catalog.fail_snapshot_with(RemoteError::Server {
        status: 502,
        message: "bad gateway".into(),
    });

    let err = fixture.pipeline(fixture.config()).run(RunMode::Plan).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::RemoteQuery(RemoteError::Server { status: 502, .. }))
    ));
    assert_eq!(fixture.catalog.calls().len(), 3);
    assert!(fixture.catalog.mutation_calls().is_empty());
}
