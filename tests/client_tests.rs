mod common;

use common::{multi_access, single_access, tenant, MockConnector};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tenancy_sdk::{DataError, RequestContext, ScopedClient};

/// Business code written once against the client, run unchanged in both modes.
async fn record_payment(client: &ScopedClient<MockConnector>) -> Result<Vec<Value>, DataError> {
    let loans = client.entity("loans")?;
    let mut rows = loans.find_many(&[("status".into(), json!("open"))], Some(10), None).await?;
    rows.extend(client.raw_query("SELECT now()", &[]).await?);
    client
        .raw_execute("UPDATE loans SET status = $1 WHERE id = $2", &[json!("paid"), json!(7)])
        .await?;
    let committed = client
        .transaction(|tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO payments (loan_id) VALUES ($1)", &[json!(7)]).await?;
                tx.fetch_all("SELECT balance FROM treasury", &[]).await
            })
        })
        .await?;
    rows.extend(committed);
    Ok(rows)
}

fn databases(rows: &[Value]) -> Vec<&str> {
    rows.iter().filter_map(|r| r["database"].as_str()).collect()
}

#[tokio::test]
async fn same_code_runs_in_single_and_multi_tenant_mode() {
    common::init_tracing();
    let ctx = RequestContext::for_tenant("acme-co");

    let single = MockConnector::new();
    let access = single_access(&single).await;
    assert!(!access.is_multi_tenant());
    let rows = record_payment(&access.scoped(&ctx).await.unwrap()).await.unwrap();
    assert_eq!(databases(&rows), vec!["tenancy"; 3]);
    assert_eq!(single.targets()[0].url, common::BASE_URL);

    let multi = MockConnector::new();
    let access = multi_access(&multi);
    assert!(access.is_multi_tenant());
    let rows = record_payment(&access.scoped(&ctx).await.unwrap()).await.unwrap();
    assert_eq!(databases(&rows), vec!["org_acme_co"; 3]);

    // Same statements, different database.
    let strip = |log: Vec<String>| -> Vec<String> {
        log.into_iter()
            .map(|line| line.split_once(": ").map(|(_, sql)| sql.to_string()).unwrap_or(line))
            .collect()
    };
    assert_eq!(strip(single.log()), strip(multi.log()));
}

#[tokio::test]
async fn single_tenant_mode_shares_one_connection() {
    let connector = MockConnector::new();
    let access = single_access(&connector).await;
    assert_eq!(connector.connect_count(), 1);
    assert!(access.cache().is_none());

    let a = access.scoped(&RequestContext::for_tenant("acme-co")).await.unwrap();
    let b = access.scoped(&RequestContext::for_tenant("beta")).await.unwrap();
    assert!(Arc::ptr_eq(a.connection(), b.connection()));
    assert_eq!(a.tenant_id().as_str(), "acme-co");
    assert_eq!(b.tenant_id().as_str(), "beta");
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn single_tenant_mode_surfaces_startup_failure() {
    let connector = MockConnector::new();
    connector.fail_connects("default", 1);
    let config = tenancy_sdk::DataConfig::default()
        .with_database_url(common::BASE_URL)
        .with_multi_tenant(false);
    let err = tenancy_sdk::DataAccess::connect(&config, connector.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DataError::Connection { ref tenant_id, .. } if tenant_id == &tenant("default")));
}

#[tokio::test]
async fn transaction_commits_on_success() {
    let connector = MockConnector::new();
    let access = multi_access(&connector);
    let client = access.scoped(&RequestContext::for_tenant("beta")).await.unwrap();

    let affected = client
        .transaction(|tx| {
            Box::pin(async move {
                let a = tx.execute("UPDATE a SET x = 1", &[]).await?;
                let b = tx.execute("UPDATE b SET y = 2", &[]).await?;
                Ok(a + b)
            })
        })
        .await
        .unwrap();

    assert_eq!(affected, 2);
    assert_eq!(
        connector.log(),
        vec![
            "org_beta: BEGIN",
            "org_beta: UPDATE a SET x = 1",
            "org_beta: UPDATE b SET y = 2",
            "org_beta: COMMIT",
        ]
    );
}

#[tokio::test]
async fn transaction_rolls_back_on_error() {
    let connector = MockConnector::new();
    let access = multi_access(&connector);
    let client = access.scoped(&RequestContext::for_tenant("beta")).await.unwrap();

    let result: Result<(), DataError> = client
        .transaction(|tx| {
            Box::pin(async move {
                tx.execute("UPDATE a SET x = 1", &[]).await?;
                Err(DataError::Validation("insufficient balance".into()))
            })
        })
        .await;

    assert!(matches!(result, Err(DataError::Validation(_))));
    let log = connector.log();
    assert_eq!(log.last().map(String::as_str), Some("org_beta: ROLLBACK"));
    assert!(!log.iter().any(|l| l.ends_with("COMMIT")));
}

#[tokio::test]
async fn entity_accessors_build_tenant_scoped_sql() {
    let connector = MockConnector::new();
    let access = multi_access(&connector);
    let client = access.scoped(&RequestContext::for_tenant("acme-co")).await.unwrap();
    let loans = client.entity("loans").unwrap();
    assert_eq!(loans.def().table, "loans");

    let row = loans.find_by_id(&json!("0b6c0f9e-1111-4b1a-9d7e-2f6f1c7e0a01")).await.unwrap().unwrap();
    let sql = row["sql"].as_str().unwrap();
    assert!(sql.contains(r#"FROM "public"."loans""#), "{sql}");
    assert!(sql.contains(r#"WHERE "id" = $1::uuid"#), "{sql}");
    assert_eq!(row["database"], "org_acme_co");

    assert_eq!(loans.count(&[]).await.unwrap(), 3);

    let mut body = Map::new();
    body.insert("amount".into(), json!("1200.50"));
    body.insert("status".into(), json!("open"));
    let created = loans.create(&body).await.unwrap();
    assert!(created["sql"].as_str().unwrap().starts_with(r#"INSERT INTO "public"."loans""#));
    assert_eq!(created["params"], json!(["1200.50", "open"]));

    let deleted = loans.delete(&json!(1)).await.unwrap().unwrap();
    assert!(deleted["sql"].as_str().unwrap().starts_with(r#"DELETE FROM "public"."loans""#));
}

#[tokio::test]
async fn entity_accessor_rejects_unknown_names_and_columns() {
    let connector = MockConnector::new();
    let access = multi_access(&connector);
    let client = access.scoped(&RequestContext::for_tenant("acme-co")).await.unwrap();

    assert!(matches!(client.entity("invoices").err().unwrap(), DataError::UnknownEntity(name) if name == "invoices"));

    let loans = client.entity("loans").unwrap();
    let err = loans
        .find_many(&[("balance".into(), json!(1))], None, None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DataError::Validation(_)));
    // Rejected before reaching the database.
    assert!(connector.log().is_empty());
}

#[tokio::test]
async fn clients_for_different_tenants_hit_different_databases() {
    let connector = MockConnector::new();
    let access = multi_access(&connector);
    let acme = access.scoped(&RequestContext::for_tenant("acme-co")).await.unwrap();
    let beta = access.scoped(&RequestContext::for_tenant("beta")).await.unwrap();

    let a = acme.raw_query("SELECT 1", &[]).await.unwrap();
    let b = beta.raw_query("SELECT 1", &[]).await.unwrap();
    assert_eq!(a[0]["database"], "org_acme_co");
    assert_eq!(b[0]["database"], "org_beta");
}
