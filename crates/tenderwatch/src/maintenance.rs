//! Database initialisation and offline verification.

use tenderwatch_core::{
    date, validate_envelope, validate_structure, Model, Record, TrustPolicy, ValidationError,
};
use tenderwatch_store::{Engine, ListQuery, RecordStore, Table, MAX_BATCH_IDS};

use crate::error::{Result, ServiceError};
use crate::service::Snapshot;

/// Create the tables and store the root key.
///
/// The root key is trusted as given: it cannot be checked against a keyring
/// that does not exist yet.
pub async fn init_database(store: &dyn Engine, root_key: &Record, drop_existing: bool) -> Result<()> {
    if root_key.model() != Model::ADMIN_PUBKEY {
        return Err(ValidationError::BadModelName(root_key.model().to_owned()).into());
    }
    store.init_schema(drop_existing).await?;
    store.put_record(root_key).await?;
    tracing::info!(id = %root_key.id, drop = drop_existing, "database initialised");
    Ok(())
}

/// Outcome of [`verify_database`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub success: usize,
    pub errors: usize,
}

/// Re-validate every stored record in insertion order.
///
/// Trust state is rebuilt from the table itself: keys and schemas take
/// effect from the record that introduces them onwards. Envelope dates are
/// not checked and references are not resolved. Until the first key is seen
/// only the record structure is checked.
///
/// Stops at the first failure unless `ignore_errors` is set.
pub async fn verify_database(store: &dyn Engine, ignore_errors: bool) -> Result<VerifyReport> {
    let policy = TrustPolicy::replay();
    let mut state = Snapshot::default();
    let mut report = VerifyReport::default();
    let mut query = ListQuery::after(None, MAX_BATCH_IDS);

    loop {
        let page = store.list(Table::Data, &query).await?;
        if page.is_empty() {
            break;
        }
        let records = store.get_records(&page.ids).await?;
        if records.len() != page.ids.len() {
            tracing::warn!(listed = page.ids.len(), loaded = records.len(), "records vanished during verify");
        }

        for record in records {
            match verify_record(&record, &mut state, &policy) {
                Ok(()) => report.success += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(id = %record.id, owner = record.owner(), model = record.model(), error = %e, "verify failed");
                    if !ignore_errors {
                        return Err(ServiceError::Verify {
                            id: record.id.to_string(),
                            source: Box::new(e),
                        });
                    }
                }
            }
        }
        query.cursor = page.next;
    }

    tracing::info!(success = report.success, errors = report.errors, "verify finished");
    Ok(report)
}

fn verify_record(record: &Record, state: &mut Snapshot, policy: &TrustPolicy) -> Result<()> {
    let raw = record.to_value();
    if state.keyring.is_empty() {
        validate_structure(&raw)?;
    } else {
        validate_envelope(&raw, &state.keyring, date::now(), policy)?;
    }
    if !state.apply(record)? {
        state.schemas.check_envelope(&record.envelope)?;
    }
    Ok(())
}
