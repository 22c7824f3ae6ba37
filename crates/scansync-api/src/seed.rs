//! Optional startup import of records and permission grants.
//!
//! The file is JSON:
//! `{"permissions": {"<user>": ["scanning", "tickets"]}, "records": {"tickets": [...]}}`

use std::collections::BTreeMap;
use std::path::Path;

use scansync_core::models::{Permission, Record, Scope};
use scansync_core::services::SyncService;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;

#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    permissions: BTreeMap<String, Vec<Permission>>,
    #[serde(default)]
    records: BTreeMap<Scope, Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub grants: usize,
    pub records: usize,
}

pub async fn load_seed(service: &SyncService, path: &Path) -> Result<SeedSummary, AppError> {
    let contents = std::fs::read_to_string(path).map_err(|error| {
        AppError::Config(format!("Cannot read seed file {}: {error}", path.display()))
    })?;
    apply_seed(service, &contents).await
}

async fn apply_seed(service: &SyncService, contents: &str) -> Result<SeedSummary, AppError> {
    let seed: SeedFile = serde_json::from_str(contents)
        .map_err(|error| AppError::Config(format!("Invalid seed file: {error}")))?;

    let mut records = Vec::new();
    for (scope, values) in seed.records {
        for (index, value) in values.into_iter().enumerate() {
            let record = Record::from_value(scope, value).map_err(|error| {
                AppError::Config(format!("Invalid seed record {scope}[{index}]: {error}"))
            })?;
            records.push(record);
        }
    }
    let imported = service.import_records(&records).await?;

    let mut grants = 0;
    for (user_id, permissions) in &seed.permissions {
        for permission in permissions {
            service.grant_permission(user_id, *permission).await?;
            grants += 1;
        }
    }

    Ok(SeedSummary {
        grants,
        records: imported,
    })
}
