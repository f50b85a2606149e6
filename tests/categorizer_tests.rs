//! Integration tests for the two categorization flows: automatic
//! (category chosen by the classifier) and targeted (category fixed by the
//! operator), including candidate filtering, exclusions and membership
//! skips.

use std::sync::Arc;
use std::time::Duration;

use catalog_automator_lib::automation::AutomationHub;
use catalog_automator_lib::domain::{Category, JobConfig, JobState, JobType, Subcategory};
use catalog_automator_lib::infrastructure::{Classifier, UsageLedger};
use catalog_automator_lib::test_utils::{
    FnClassifier, MemoryRecordStore, ScriptedClassifier, classification, product,
    product_in_category,
};

async fn make_hub(
    store: &Arc<MemoryRecordStore>,
    classifier: Arc<dyn Classifier>,
) -> (AutomationHub, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(
        UsageLedger::open(dir.path().join("daily_stats.json"))
            .await
            .unwrap(),
    );
    (
        AutomationHub::new(store.clone(), classifier, ledger),
        dir,
    )
}

fn category(id: &str, name: &str) -> Category {
    Category {
        id: id.to_string(),
        name: name.to_string(),
    }
}

fn subcategory(id: &str, name: &str, category_id: &str) -> Subcategory {
    Subcategory {
        id: id.to_string(),
        name: name.to_string(),
        category_id: category_id.to_string(),
    }
}

async fn run_to_completion(hub: &AutomationHub, job_type: JobType, config: JobConfig) {
    hub.start(job_type, config).await.unwrap();
    for _ in 0..500 {
        if hub.status(job_type).await.state == JobState::Stopped {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job did not reach Stopped in time");
}

fn grocery_store() -> Arc<MemoryRecordStore> {
    let store = Arc::new(MemoryRecordStore::with_records(vec![
        product_in_category("p1", "Atum em Lata", "conservas"),
        product_in_category("p2", "Coca Cola 2l", "bebidas"),
    ]));
    store.set_categories(vec![
        category("mercearia", "Mercearia"),
        category("conservas", "Conservas"),
        category("bebidas", "Bebidas"),
    ]);
    store.set_subcategories(vec![
        subcategory("enlatados", "Enlatados", "mercearia"),
        subcategory("molhos", "Molhos", "mercearia"),
        subcategory("refrigerantes", "Refrigerantes", "bebidas"),
    ]);
    store
}

#[tokio::test]
async fn targeted_run_only_touches_the_filtered_category() {
    let store = grocery_store();
    let classifier = Arc::new(FnClassifier::new(|_prompt| {
        Ok(classification("enlatados", 20, 4))
    }));
    let (hub, _dir) = make_hub(&store, classifier).await;

    let config = JobConfig {
        establishment_id: "est-1".to_string(),
        delay_seconds: 0.0,
        target_category_id: Some("mercearia".to_string()),
        filter_category_ids: vec!["conservas".to_string()],
        ..JobConfig::default()
    };
    run_to_completion(&hub, JobType::TargetedCategorizer, config).await;

    let snapshot = hub.status(JobType::TargetedCategorizer).await;
    assert_eq!(snapshot.progress.total, 1);
    assert_eq!(snapshot.progress.processed, 1);
    assert_eq!(snapshot.progress.updated, 1);

    // The conservas record was re-homed under the target category.
    let p1 = store.record("p1").unwrap();
    assert_eq!(p1.categories_ids, vec!["mercearia".to_string()]);
    assert_eq!(p1.subcategories_ids, vec!["enlatados".to_string()]);
    assert_eq!(p1.shelves_ids, vec!["mercearia_enlatados".to_string()]);

    // The bebidas record was never a candidate.
    let p2 = store.record("p2").unwrap();
    assert_eq!(p2.categories_ids, vec!["bebidas".to_string()]);
    assert!(store.writes().iter().all(|(id, _)| id == "p1"));
}

#[tokio::test]
async fn targeted_run_without_filter_defaults_to_the_target_category() {
    let store = grocery_store();
    let classifier = Arc::new(FnClassifier::new(|_prompt| {
        Ok(classification("refrigerantes", 20, 4))
    }));
    let (hub, _dir) = make_hub(&store, classifier).await;

    let config = JobConfig {
        establishment_id: "est-1".to_string(),
        delay_seconds: 0.0,
        target_category_id: Some("bebidas".to_string()),
        ..JobConfig::default()
    };
    run_to_completion(&hub, JobType::TargetedCategorizer, config).await;

    // Only the record already tagged with the target was evaluated.
    let snapshot = hub.status(JobType::TargetedCategorizer).await;
    assert_eq!(snapshot.progress.total, 1);
    let p2 = store.record("p2").unwrap();
    assert_eq!(p2.subcategories_ids, vec!["refrigerantes".to_string()]);
}

#[tokio::test]
async fn include_others_asks_membership_and_skips_refusals() {
    let store = grocery_store();
    // Records outside the target get a membership question first; answer
    // NAO for the drink, assign a subcategory to everything else.
    let classifier = Arc::new(FnClassifier::new(|prompt: &str| {
        if prompt.contains("Categoria alvo") && prompt.contains("Coca Cola") {
            Ok(classification("NAO", 20, 2))
        } else {
            Ok(classification("enlatados", 20, 4))
        }
    }));
    let (hub, _dir) = make_hub(&store, classifier).await;

    let config = JobConfig {
        establishment_id: "est-1".to_string(),
        delay_seconds: 0.0,
        target_category_id: Some("mercearia".to_string()),
        include_others: true,
        ..JobConfig::default()
    };
    run_to_completion(&hub, JobType::TargetedCategorizer, config).await;

    let snapshot = hub.status(JobType::TargetedCategorizer).await;
    assert_eq!(snapshot.progress.total, 2);
    assert_eq!(snapshot.progress.processed, 2);
    assert_eq!(snapshot.progress.updated, 1);
    assert_eq!(snapshot.progress.skipped, 1);

    assert_eq!(
        store.record("p1").unwrap().categories_ids,
        vec!["mercearia".to_string()]
    );
    assert_eq!(
        store.record("p2").unwrap().categories_ids,
        vec!["bebidas".to_string()]
    );
}

#[tokio::test]
async fn targeted_run_with_unknown_target_aborts() {
    let store = grocery_store();
    let classifier = Arc::new(ScriptedClassifier::new(vec![]));
    let (hub, _dir) = make_hub(&store, classifier).await;

    let config = JobConfig {
        establishment_id: "est-1".to_string(),
        delay_seconds: 0.0,
        target_category_id: Some("acougue".to_string()),
        ..JobConfig::default()
    };
    run_to_completion(&hub, JobType::TargetedCategorizer, config).await;

    let snapshot = hub.status(JobType::TargetedCategorizer).await;
    assert_eq!(snapshot.progress.processed, 0);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn auto_run_assigns_in_two_stages_and_honors_exclusions() {
    let store = Arc::new(MemoryRecordStore::with_records(vec![product(
        "p1",
        "Coca Cola 2l",
    )]));
    store.set_categories(vec![
        category("mercearia", "Mercearia"),
        category("bebidas", "Bebidas"),
    ]);
    store.set_subcategories(vec![
        subcategory("refrigerantes", "Refrigerantes", "bebidas"),
        subcategory("sucos", "Sucos", "bebidas"),
    ]);
    let classifier = Arc::new(ScriptedClassifier::new(vec![
        Ok(classification("bebidas", 30, 3)),
        Ok(classification("refrigerantes", 25, 4)),
    ]));
    let (hub, _dir) = make_hub(&store, classifier.clone()).await;

    let config = JobConfig {
        establishment_id: "est-1".to_string(),
        delay_seconds: 0.0,
        exclude_category_ids: vec!["mercearia".to_string()],
        ..JobConfig::default()
    };
    run_to_completion(&hub, JobType::AutoCategorizer, config).await;

    let p1 = store.record("p1").unwrap();
    assert_eq!(p1.categories_ids, vec!["bebidas".to_string()]);
    assert_eq!(p1.subcategories_ids, vec!["refrigerantes".to_string()]);

    // Two classification calls per record, both metered.
    assert_eq!(hub.usage_today().await.calls, 2);
    assert_eq!(hub.usage_today().await.tokens, 62);

    // The excluded category is never offered to the classifier.
    let prompts = classifier.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("id=bebidas"));
    assert!(!prompts[0].contains("mercearia"));
}

#[tokio::test]
async fn auto_run_reassignment_of_an_identical_record_is_unchanged() {
    let store = Arc::new(MemoryRecordStore::with_records(vec![product(
        "p1",
        "Coca Cola 2l",
    )]));
    store.set_categories(vec![category("bebidas", "Bebidas")]);
    store.set_subcategories(vec![subcategory(
        "refrigerantes",
        "Refrigerantes",
        "bebidas",
    )]);
    let classifier = Arc::new(FnClassifier::new(|prompt: &str| {
        if prompt.contains("Categorias disponiveis") {
            Ok(classification("bebidas", 30, 3))
        } else {
            Ok(classification("refrigerantes", 25, 4))
        }
    }));
    let (hub, _dir) = make_hub(&store, classifier).await;

    let config = JobConfig {
        establishment_id: "est-1".to_string(),
        delay_seconds: 0.0,
        ..JobConfig::default()
    };
    run_to_completion(&hub, JobType::AutoCategorizer, config.clone()).await;
    assert_eq!(
        hub.status(JobType::AutoCategorizer).await.progress.updated,
        1
    );

    run_to_completion(&hub, JobType::AutoCategorizer, config).await;
    let second = hub.status(JobType::AutoCategorizer).await;
    assert_eq!(second.progress.updated, 0);
    assert_eq!(second.progress.unchanged, 1);
    assert_eq!(store.writes().len(), 1);
}

#[tokio::test]
async fn auto_run_assigns_category_only_when_it_has_no_subcategories() {
    let store = Arc::new(MemoryRecordStore::with_records(vec![product(
        "p1",
        "Pao Frances",
    )]));
    store.set_categories(vec![category("padaria", "Padaria")]);
    let classifier = Arc::new(ScriptedClassifier::new(vec![Ok(classification(
        "padaria", 30, 3,
    ))]));
    let (hub, _dir) = make_hub(&store, classifier).await;

    let config = JobConfig {
        establishment_id: "est-1".to_string(),
        delay_seconds: 0.0,
        ..JobConfig::default()
    };
    run_to_completion(&hub, JobType::AutoCategorizer, config).await;

    let p1 = store.record("p1").unwrap();
    assert_eq!(p1.categories_ids, vec!["padaria".to_string()]);
    assert!(p1.subcategories_ids.is_empty());
    assert_eq!(p1.shelves_ids, vec!["padaria".to_string()]);
}

#[tokio::test]
async fn auto_run_with_everything_excluded_aborts_before_processing() {
    let store = Arc::new(MemoryRecordStore::with_records(vec![product("p1", "a")]));
    store.set_categories(vec![category("bebidas", "Bebidas")]);
    let classifier = Arc::new(ScriptedClassifier::new(vec![]));
    let (hub, _dir) = make_hub(&store, classifier).await;

    let config = JobConfig {
        establishment_id: "est-1".to_string(),
        delay_seconds: 0.0,
        exclude_category_ids: vec!["bebidas".to_string()],
        ..JobConfig::default()
    };
    run_to_completion(&hub, JobType::AutoCategorizer, config).await;

    let snapshot = hub.status(JobType::AutoCategorizer).await;
    assert_eq!(snapshot.progress.processed, 0);
    assert!(store.writes().is_empty());
}
