//! Backend-agnostic engine conformance suite.
//!
//! Every check takes a freshly initialised engine and panics on a contract
//! violation. [`run_all`] resets the engine between checks, so one handle
//! can be driven through the whole suite. The last check closes the engine.

use std::collections::HashSet;

use serde_json::{json, Value};

use tenderwatch_store::{
    Document, Engine, ListQuery, RecordStore, StoreError, Table, MAX_BATCH_IDS,
};

/// Run every check, dropping all tables before each one, then close the
/// engine and check that it refuses further work.
pub async fn run_all(engine: &dyn Engine) {
    macro_rules! run {
        ($($check:ident),* $(,)?) => {$(
            engine
                .init_schema(true)
                .await
                .unwrap_or_else(|e| panic!("{}: reset failed: {e}", stringify!($check)));
            $check(engine).await;
        )*};
    }
    run!(
        put_get,
        duplicate_rejected,
        pagination_complete,
        open_boundaries,
        get_many,
        exists_with_model,
        tables_isolated,
        reserved_keys_survive,
        init_schema_drop,
    );
    closed_refuses(engine).await;
}

/// A record-shaped document.
pub fn doc(id: &str, model: &str) -> Document {
    Document::from_value(json!({
        "id": id,
        "envelope": {"model": model, "owner": "o", "date": "2020-01-01T00:00:00Z", "payload": {}},
        "sign": "",
    }))
    .unwrap_or_else(|e| panic!("bad fixture document {id}: {e}"))
}

fn hex_id(n: usize) -> String {
    format!("{n:032x}")
}

async fn insert_many(engine: &dyn Engine, table: Table, n: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let id = hex_id(i + 1);
        engine.put(table, &doc(&id, "form/test")).await.unwrap();
        ids.push(id);
    }
    ids
}

pub async fn put_get(engine: &dyn Engine) {
    let d = doc(&hex_id(1), "comment/comment");
    engine.put(Table::Data, &d).await.unwrap();
    assert_eq!(engine.get(Table::Data, d.id()).await.unwrap(), Some(d));
    assert_eq!(engine.get(Table::Data, &hex_id(2)).await.unwrap(), None);
}

pub async fn duplicate_rejected(engine: &dyn Engine) {
    let first = doc(&hex_id(1), "comment/comment");
    engine.put(Table::Data, &first).await.unwrap();

    let mut second = first.to_value();
    second["envelope"]["owner"] = json!("someone-else");
    let second = Document::from_value(second).unwrap();
    let err = engine.put(Table::Data, &second).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(ref id) if id.as_str() == first.id()), "{err}");

    assert_eq!(engine.get(Table::Data, first.id()).await.unwrap(), Some(first));
    let page = engine.list(Table::Data, &ListQuery::default()).await.unwrap();
    assert_eq!(page.ids.len(), 1);
}

pub async fn pagination_complete(engine: &dyn Engine) {
    let ids = insert_many(engine, Table::Data, 23).await;

    let mut seen = Vec::new();
    let mut query = ListQuery::after(None, 5);
    loop {
        let page = engine.list(Table::Data, &query).await.unwrap();
        if page.is_empty() {
            assert!(page.next.is_none() && page.prev.is_none());
            break;
        }
        assert!(page.ids.len() <= 5);
        seen.extend(page.ids.iter().cloned());
        query.cursor = page.next;
    }
    assert_eq!(seen, ids);
    let distinct: HashSet<_> = seen.iter().collect();
    assert_eq!(distinct.len(), ids.len());

    // Walk back from the end.
    let mut back = Vec::new();
    let mut query = ListQuery::after(None, 7).reversed();
    loop {
        let page = engine.list(Table::Data, &query).await.unwrap();
        if page.is_empty() {
            break;
        }
        back.extend(page.ids.iter().cloned());
        query.cursor = page.next;
    }
    let mut reversed = ids.clone();
    reversed.reverse();
    assert_eq!(back, reversed);
}

pub async fn open_boundaries(engine: &dyn Engine) {
    let ids = insert_many(engine, Table::Data, 3).await;
    let all = engine.list(Table::Data, &ListQuery::default()).await.unwrap();
    assert_eq!(all.ids, ids);
    let first = all.prev.unwrap();
    let last = all.next.unwrap();
    assert!(first.ts() < last.ts());

    let after_first = engine.list(Table::Data, &ListQuery::after(Some(first), 10)).await.unwrap();
    assert_eq!(after_first.ids, ids[1..].to_vec());

    let after_last = engine.list(Table::Data, &ListQuery::after(Some(last), 10)).await.unwrap();
    assert!(after_last.is_empty());

    let before_last = engine
        .list(Table::Data, &ListQuery::after(Some(last), 10).reversed())
        .await
        .unwrap();
    assert_eq!(before_last.ids, vec![ids[1].clone(), ids[0].clone()]);
}

pub async fn get_many(engine: &dyn Engine) {
    let ids = insert_many(engine, Table::Data, 4).await;
    let wanted = vec![ids[3].clone(), hex_id(99), ids[0].clone()];

    let docs = engine.get_many(Table::Data, &wanted).await.unwrap();
    let got: HashSet<_> = docs.iter().map(|d| d.id().to_owned()).collect();
    assert_eq!(got, HashSet::from([ids[3].clone(), ids[0].clone()]));

    let records = engine.get_records(&wanted).await.unwrap();
    let ordered: Vec<_> = records.iter().map(|r| r.id.to_string()).collect();
    assert_eq!(ordered, vec![ids[3].clone(), ids[0].clone()]);

    let too_many: Vec<String> = (0..=MAX_BATCH_IDS).map(hex_id).collect();
    assert!(matches!(
        engine.get_many(Table::Data, &too_many).await,
        Err(StoreError::TooManyIds(n)) if n == MAX_BATCH_IDS + 1
    ));
}

pub async fn exists_with_model(engine: &dyn Engine) {
    let id = hex_id(1);
    engine.put(Table::Data, &doc(&id, "form/violation")).await.unwrap();

    assert!(engine.exists(Table::Data, &id, None).await.unwrap());
    for expected in ["form/violation", "form", "violation"] {
        assert!(engine.exists(Table::Data, &id, Some(expected)).await.unwrap(), "{expected}");
    }
    assert!(matches!(
        engine.exists(Table::Data, &id, Some("comment")).await,
        Err(StoreError::ModelMismatch { .. })
    ));
    assert!(!engine.exists(Table::Data, &hex_id(2), Some("form")).await.unwrap());
}

pub async fn tables_isolated(engine: &dyn Engine) {
    let id = hex_id(1);
    engine.put(Table::Data, &doc(&id, "form/test")).await.unwrap();
    assert!(!engine.exists(Table::Tenders, &id, None).await.unwrap());

    let tender = json!({"id": id, "dateModified": "2020-01-01T00:00:00Z"});
    assert!(engine.save_tender(tender.clone()).await.unwrap());
    assert!(!engine.save_tender(tender).await.unwrap());
    let tenders = engine.list(Table::Tenders, &ListQuery::default()).await.unwrap();
    assert_eq!(tenders.ids, vec![id.clone()]);
    let data = engine.list(Table::Data, &ListQuery::default()).await.unwrap();
    assert_eq!(data.ids, vec![id]);
}

pub async fn reserved_keys_survive(engine: &dyn Engine) {
    let schema: Value = json!({
        "$schema": "http://json-schema.org/draft-04/schema#",
        "properties": {"tender": {"$ref": "#/definitions/id"}},
        "definitions": {"id": {"type": "string"}}
    });
    let d = Document::from_value(json!({
        "id": hex_id(1),
        "envelope": {
            "model": "admin/schema",
            "owner": "root",
            "date": "2020-01-01T00:00:00Z",
            "payload": {"model": "form/violation", "schema": schema}
        },
        "sign": "",
    }))
    .unwrap();
    engine.put(Table::Data, &d).await.unwrap();
    assert_eq!(engine.get(Table::Data, d.id()).await.unwrap(), Some(d));
}

pub async fn init_schema_drop(engine: &dyn Engine) {
    insert_many(engine, Table::Data, 2).await;
    engine.init_schema(false).await.unwrap();
    assert_eq!(engine.list(Table::Data, &ListQuery::default()).await.unwrap().ids.len(), 2);
    engine.init_schema(true).await.unwrap();
    assert!(engine.list(Table::Data, &ListQuery::default()).await.unwrap().is_empty());
    engine.put(Table::Data, &doc(&hex_id(1), "form/test")).await.unwrap();
}

pub async fn closed_refuses(engine: &dyn Engine) {
    let d = doc(&hex_id(1), "form/test");
    engine.put(Table::Data, &d).await.unwrap();
    engine.close().await.unwrap();

    let refused = |what: &str, result: Result<(), StoreError>| {
        assert!(matches!(result, Err(StoreError::Closed)), "{what} after close: {result:?}");
    };
    refused("get", engine.get(Table::Data, d.id()).await.map(drop));
    refused("put", engine.put(Table::Data, &doc(&hex_id(2), "form/test")).await);
    refused("list", engine.list(Table::Data, &ListQuery::default()).await.map(drop));
    refused("exists", engine.exists(Table::Data, d.id(), None).await.map(drop));
    refused("init_schema", engine.init_schema(false).await);

    engine.close().await.unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderwatch_store::MemoryEngine;

    #[tokio::test]
    async fn test_memory_engine_conforms() {
        run_all(&MemoryEngine::new()).await;
    }
}
