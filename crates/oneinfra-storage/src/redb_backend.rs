use crate::{KVStore, Result};
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tracing::{debug, info};

const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

/// redb-based storage backend
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Open (or create) the database file at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening redb database at: {}", path.as_ref().display());

        let db = Database::create(path.as_ref())?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTRIES)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}

impl KVStore for RedbBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;
        let value = table.get(key)?.map(|v| Bytes::copy_from_slice(v.value()));
        Ok(value)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        debug!("Putting key: {}", String::from_utf8_lossy(key));

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let written = {
            let mut table = write_txn.open_table(ENTRIES)?;
            let present = table.get(key)?.is_some();
            if !present {
                table.insert(key, value)?;
            }
            !present
        };
        write_txn.commit()?;

        debug!(
            "put_if_absent {}: written={}",
            String::from_utf8_lossy(key),
            written
        );
        Ok(written)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        debug!("Deleting key: {}", String::from_utf8_lossy(key));

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;

        let mut results = Vec::new();
        for entry in table.range(prefix..)? {
            let (key, value) = entry?;
            if !key.value().starts_with(prefix) {
                break;
            }
            results.push((
                Bytes::copy_from_slice(key.value()),
                Bytes::copy_from_slice(value.value()),
            ));
        }
        Ok(results)
    }
}
