mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{
    count_rows, orchestrator, row, MockDatabase, Reply, ScriptedService, EXPLANATION,
};
use nl_sql::db::DbError;
use nl_sql::error::PipelineError;
use nl_sql::llm::LlmError;
use nl_sql::llm::models::UsageLedger;
use nl_sql::llm::templates::Language;
use nl_sql::pipeline::cache::TtlTier;
use nl_sql::pipeline::explain::{ExplanationGenerator, ExplanationRequest};
use nl_sql::pipeline::orchestrator::{ExecuteOptions, QueryOptions};

const QUESTION: &str = "How many products are there?";
const COUNT_SQL: &str = "SELECT COUNT(*) FROM products";

#[tokio::test]
async fn test_count_products_end_to_end() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(vec![Reply::generate(COUNT_SQL, 0.92)]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();

    assert!(outcome.success);
    assert!(!outcome.from_cache);
    assert_eq!(outcome.sql, COUNT_SQL);
    assert_eq!(outcome.rows, count_rows());
    assert_eq!(outcome.attempt_count, 1);
    assert!(outcome.attempts.is_empty());
    assert_eq!(outcome.confidence, Some(0.92));
    assert_eq!(outcome.explanation, EXPLANATION);
    assert!(outcome.detailed_explanation.is_none());
    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.token_usage.total_tokens, 120);
    assert_eq!(db.executed(), vec![COUNT_SQL.to_string()]);

    let schema = orchestrator.schema().await.unwrap();
    let entry = orchestrator
        .cache()
        .lookup(QUESTION, Language::English, schema.fingerprint())
        .unwrap();
    assert_eq!(entry.tier, TtlTier::Aggregate);
    assert_eq!(entry.explanation, EXPLANATION);
}

#[tokio::test]
async fn test_second_identical_question_is_served_from_cache() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(vec![Reply::generate(COUNT_SQL, 0.9)]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let first = orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();
    let second = orchestrator
        .query("how many   PRODUCTS are there", QueryOptions::default())
        .await
        .unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.sql, first.sql);
    assert_eq!(second.rows, first.rows);
    assert_eq!(second.explanation, first.explanation);
    assert_eq!(second.attempt_count, 0);
    assert_eq!(db.executed().len(), 1);
    assert_eq!(orchestrator.cache().stats().hits, 1);
}

#[tokio::test]
async fn test_bypass_cache_regenerates_and_stores() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(vec![
        Reply::generate(COUNT_SQL, 0.9),
        Reply::generate("SELECT COUNT(id) FROM products", 0.8),
    ]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();
    let bypassed = orchestrator
        .query(
            QUESTION,
            QueryOptions {
                bypass_cache: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!bypassed.from_cache);
    assert_eq!(db.executed().len(), 2);

    let cached = orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.sql, "SELECT COUNT(id) FROM products");
}

#[tokio::test]
async fn test_always_failing_database_exhausts_retries() {
    let db = Arc::new(MockDatabase::always_failing("Catalog Error: Table products is locked"));
    let service = Arc::new(ScriptedService::new(vec![
        Reply::generate(COUNT_SQL, 0.9),
        Reply::fix("SELECT COUNT(id) FROM products"),
        Reply::fix("SELECT COUNT(name) FROM products"),
    ]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.attempt_count, 3);
    assert_eq!(outcome.attempts.len(), 2);
    assert!(outcome.rows.is_empty());
    assert_eq!(outcome.sql, "SELECT COUNT(name) FROM products");
    assert_eq!(
        outcome.explanation,
        "Could not complete this request after 3 attempts."
    );
    assert_eq!(
        outcome.error.as_deref(),
        Some("Catalog Error: Table products is locked")
    );
    assert_eq!(db.executed().len(), 3);
    assert_eq!(service.explanations.load(Ordering::SeqCst), 0);
    assert!(orchestrator.cache().is_empty());
}

#[tokio::test]
async fn test_failure_then_success_records_one_attempt() {
    let db = Arc::new(MockDatabase::scripted(
        vec![Err(DbError::Execution(
            "Binder Error: Referenced column \"qty\" not found".to_string(),
        ))],
        Ok(vec![row(&[("total_stock", json!(120))])]),
    ));
    let service = Arc::new(ScriptedService::new(vec![
        Reply::generate("SELECT SUM(qty) FROM products", 0.7),
        Reply::fix("SELECT SUM(stock) AS total_stock FROM products"),
    ]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator
        .query("Total stock?", QueryOptions::default())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.attempt_count, 2);
    assert_eq!(outcome.attempts.len(), 1);
    assert!(outcome.attempts[0].error.contains("qty"));
    assert_eq!(outcome.attempts[0].reasoning, "use the right column");
    assert_eq!(
        outcome.attempts[0].fix_attempt,
        "SELECT SUM(stock) AS total_stock FROM products"
    );
    assert_eq!(outcome.sql, "SELECT SUM(stock) AS total_stock FROM products");
    assert_eq!(outcome.confidence, Some(0.7));
}

#[tokio::test]
async fn test_rejected_statement_is_never_executed() {
    let db = Arc::new(MockDatabase::answering(vec![row(&[("name", json!("Widget"))])]));
    let service = Arc::new(ScriptedService::new(vec![
        Reply::generate("DELETE FROM products", 0.4),
        Reply::fix("SELECT name FROM products LIMIT 5"),
    ]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator
        .query("Remove old products", QueryOptions::default())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.attempts.len(), 1);
    assert!(outcome.attempts[0].error.contains("DELETE"));
    assert_eq!(db.executed(), vec!["SELECT name FROM products LIMIT 5".to_string()]);
}

#[tokio::test]
async fn test_schema_fetch_failure_is_fatal() {
    let db = Arc::new(MockDatabase::unreachable());
    let service = Arc::new(ScriptedService::new(vec![Reply::generate(COUNT_SQL, 0.9)]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let err = orchestrator
        .query(QUESTION, QueryOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::SchemaFetch(_)));
    assert!(service.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_first_generation_failure_is_fatal() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(vec![Reply::Fail(
        LlmError::ConnectionError("timed out".to_string()),
    )]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let err = orchestrator
        .query(QUESTION, QueryOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Translation(LlmError::ConnectionError(_))));
    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn test_correction_failure_is_reported_not_raised() {
    let db = Arc::new(MockDatabase::always_failing("Parser Error: syntax error"));
    let service = Arc::new(ScriptedService::new(vec![Reply::generate(COUNT_SQL, 0.9)]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.attempt_count, 1);
    assert_eq!(outcome.attempts.len(), 1);
    assert!(outcome.attempts[0].reasoning.contains("rate limited"));
    assert!(outcome.explanation.contains("1 attempts"));
}

#[tokio::test]
async fn test_text_mode_has_no_confidence() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::text_only(vec![Reply::Text(
        "Here you go:\n```sql\nSELECT COUNT(*) FROM products;\n```",
    )]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.sql, "SELECT COUNT(*) FROM products;");
    assert_eq!(outcome.confidence, None);
    let requests = service.requests.lock().unwrap();
    assert!(requests.iter().all(|r| r.tools.is_empty()));
}

#[tokio::test]
async fn test_unusable_tool_call_falls_back_to_text() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(vec![
        Reply::Tool {
            name: "generate_sql",
            arguments: json!({"query": COUNT_SQL}).to_string(),
        },
        Reply::Text("SELECT COUNT(*) FROM products"),
    ]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.sql, COUNT_SQL);
    assert_eq!(outcome.confidence, None);
    assert_eq!(service.remaining(), 0);
    // Both generation requests count towards usage
    assert_eq!(outcome.token_usage.total_tokens, 220);
}

#[tokio::test]
async fn test_explanation_failure_uses_fallback_message() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::failing_explanations(vec![Reply::generate(
        COUNT_SQL, 0.9,
    )]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator
        .query(
            QUESTION,
            QueryOptions {
                detailed: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(
        outcome.explanation,
        "The query ran successfully and returned 1 rows."
    );
    assert!(outcome.detailed_explanation.is_none());
}

/// Explains from the rows alone; fails for detailed requests.
struct RowCountExplainer;

#[async_trait]
impl ExplanationGenerator for RowCountExplainer {
    async fn explain(
        &self,
        request: &ExplanationRequest<'_>,
        _usage: &mut UsageLedger,
    ) -> Result<String, LlmError> {
        if request.detailed {
            return Err(LlmError::ResponseError("no detail available".to_string()));
        }
        Ok(format!("{} row(s) for \"{}\"", request.rows.len(), request.question))
    }
}

#[tokio::test]
async fn test_custom_explainer_replaces_completion_service() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(vec![Reply::generate(COUNT_SQL, 0.9)]));
    let orchestrator =
        orchestrator(db.clone(), service.clone(), 3).with_explainer(Arc::new(RowCountExplainer));

    let outcome = orchestrator
        .query(
            QUESTION,
            QueryOptions {
                detailed: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.explanation, format!("1 row(s) for \"{}\"", QUESTION));
    assert!(outcome.detailed_explanation.is_none());
    assert_eq!(service.explanations.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.token_usage.total_tokens, 100);
}

#[tokio::test]
async fn test_detailed_explanation_on_cache_hit() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(vec![Reply::generate(COUNT_SQL, 0.9)]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();
    let outcome = orchestrator
        .query(
            QUESTION,
            QueryOptions {
                detailed: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(outcome.from_cache);
    assert_eq!(outcome.detailed_explanation.as_deref(), Some(EXPLANATION));
    assert_eq!(outcome.token_usage.total_tokens, 20);
}

#[tokio::test]
async fn test_language_partitions_cache() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::failing_explanations(vec![
        Reply::generate(COUNT_SQL, 0.9),
        Reply::generate(COUNT_SQL, 0.9),
    ]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();
    let italian = orchestrator
        .query(
            QUESTION,
            QueryOptions {
                language: Some(Language::Italian),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!italian.from_cache);
    assert!(italian.explanation.starts_with("La query è stata eseguita"));
    assert_eq!(orchestrator.cache().len(), 2);
}

#[tokio::test]
async fn test_table_invalidation_forces_regeneration() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(vec![
        Reply::generate(COUNT_SQL, 0.9),
        Reply::generate(COUNT_SQL, 0.9),
    ]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();
    assert_eq!(orchestrator.cache().invalidate_by_table("products"), 1);

    let again = orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();
    assert!(!again.from_cache);
    assert_eq!(db.executed().len(), 2);
}

#[tokio::test]
async fn test_disabled_cache_never_serves() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(vec![
        Reply::generate(COUNT_SQL, 0.9),
        Reply::generate(COUNT_SQL, 0.9),
    ]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();
    orchestrator.cache().set_enabled(false);
    assert!(orchestrator.cache().is_empty());

    let again = orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();
    assert!(!again.from_cache);
    assert!(orchestrator.cache().is_empty());
}

#[tokio::test]
async fn test_execute_sql_rejects_mutation() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(Vec::new()));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator
        .execute_sql("UPDATE products SET stock = 0", ExecuteOptions::default())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("UPDATE"));
    assert!(outcome.explanation.starts_with("The statement was not executed"));
    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn test_execute_sql_runs_without_caching() {
    let db = Arc::new(MockDatabase::answering(vec![row(&[("name", json!("Widget"))])]));
    let service = Arc::new(ScriptedService::new(Vec::new()));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator
        .execute_sql("SELECT * FROM products", ExecuteOptions::default())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.rows.len(), 1);
    assert_eq!(outcome.explanation, EXPLANATION);
    assert!(!outcome.warnings.is_empty());
    assert_eq!(
        outcome.suggestions,
        vec!["Replace SELECT * with an explicit column list".to_string()]
    );
    assert!(orchestrator.cache().is_empty());
}

#[tokio::test]
async fn test_execute_sql_reports_database_error() {
    let db = Arc::new(MockDatabase::always_failing("Binder Error: column nme not found"));
    let service = Arc::new(ScriptedService::new(Vec::new()));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    let outcome = orchestrator
        .execute_sql("SELECT nme FROM products LIMIT 1", ExecuteOptions::default())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Binder Error: column nme not found"));
    assert!(outcome.rows.is_empty());
}

#[tokio::test]
async fn test_schema_snapshot_reused_between_questions() {
    let db = Arc::new(MockDatabase::answering(count_rows()));
    let service = Arc::new(ScriptedService::new(vec![
        Reply::generate(COUNT_SQL, 0.9),
        Reply::generate("SELECT name FROM products LIMIT 3", 0.9),
    ]));
    let orchestrator = orchestrator(db.clone(), service.clone(), 3);

    orchestrator.query(QUESTION, QueryOptions::default()).await.unwrap();
    orchestrator
        .query("Name three products", QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(db.metadata_fetches.load(Ordering::SeqCst), 1);
}
