use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::Result;

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
const BUILD_INFO: TableDefinition<&str, &str> =
    TableDefinition::new("build_info");

/// Persistent key/value settings plus a record of the last store build.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(redb::Error::from)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.open_table(BUILD_INFO)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    // -- Build info --

    /// Replace the recorded build info with `entries` in one transaction.
    pub fn record_build(&self, entries: &[(&str, String)]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(BUILD_INFO)?;
            let mut stale = Vec::new();
            for entry in table.iter()? {
                let (k, _) = entry?;
                stale.push(k.value().to_string());
            }
            for key in &stale {
                table.remove(key.as_str())?;
            }
            for (key, value) in entries {
                table.insert(*key, value.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn build_info(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(BUILD_INFO)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn settings_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.get_setting("embed_model").unwrap(), None);

        db.set_setting("embed_model", "mxbai-embed-large").unwrap();
        assert_eq!(
            db.get_setting("embed_model").unwrap(),
            Some("mxbai-embed-large".to_string())
        );

        let settings = db.list_settings().unwrap();
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].0, "embed_model");

        assert!(db.remove_setting("embed_model").unwrap());
        assert!(!db.remove_setting("embed_model").unwrap());
        assert_eq!(db.get_setting("embed_model").unwrap(), None);
    }

    #[test]
    fn record_build_replaces_previous_entries() {
        let (_tmp, db) = test_db();

        db.record_build(&[
            ("vectors", "3".to_string()),
            ("skipped", "1".to_string()),
        ])
        .unwrap();
        db.record_build(&[("vectors", "5".to_string())]).unwrap();

        let info = db.build_info().unwrap();
        assert_eq!(info, vec![("vectors".to_string(), "5".to_string())]);
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.redb");

        {
            let db = ConfigDb::open(&path).unwrap();
            db.set_setting("top_k", "8").unwrap();
        }

        {
            let db = ConfigDb::open(&path).unwrap();
            assert_eq!(
                db.get_setting("top_k").unwrap(),
                Some("8".to_string())
            );
        }
    }
}
