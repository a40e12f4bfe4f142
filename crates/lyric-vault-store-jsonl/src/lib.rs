use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use lyric_vault_core::{ArtefactId, ArtefactRecord};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

pub const STORE_FORMAT: &str = "lyric-vault.v1";

/// Predicate used to select records, in the spirit of a document-store query.
pub type Selector<'a> = &'a dyn Fn(&ArtefactRecord) -> bool;

/// Ordered, keyed collection of artefact records.
///
/// Records come back from [`ArtefactCollection::all`] in insertion order. Ids
/// handed out by [`ArtefactCollection::allocate_id`] are never handed out
/// again, even after the record carrying them is removed.
pub trait ArtefactCollection {
    /// Append a new record.
    ///
    /// # Errors
    /// Returns an error when a record with the same id already exists or the
    /// write cannot be persisted.
    fn insert(&mut self, record: ArtefactRecord) -> Result<()>;

    /// First record matching `selector`.
    ///
    /// # Errors
    /// Returns an error when the collection cannot be read.
    fn get_by(&self, selector: Selector<'_>) -> Result<Option<ArtefactRecord>>;

    /// Replace every record matching `selector` with `record`, returning how
    /// many were replaced.
    ///
    /// # Errors
    /// Returns an error when a matching record has a different id than
    /// `record`, or the write cannot be persisted.
    fn update(&mut self, record: ArtefactRecord, selector: Selector<'_>) -> Result<usize>;

    /// Remove every record matching `selector`, returning how many were removed.
    ///
    /// # Errors
    /// Returns an error when the write cannot be persisted.
    fn remove(&mut self, selector: Selector<'_>) -> Result<usize>;

    /// Snapshot of all records in insertion order.
    ///
    /// # Errors
    /// Returns an error when the collection cannot be read.
    fn all(&self) -> Result<Vec<ArtefactRecord>>;

    /// Number of records currently stored.
    ///
    /// # Errors
    /// Returns an error when the collection cannot be read.
    fn count(&self) -> Result<usize>;

    /// Reserve the next artefact id from the monotonic counter.
    ///
    /// # Errors
    /// Returns an error when the counter cannot be persisted.
    fn allocate_id(&mut self) -> Result<ArtefactId>;
}

/// Select the record with the given id.
pub fn by_id(id: ArtefactId) -> impl Fn(&ArtefactRecord) -> bool {
    move |record| record.id == id
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct StoreHeader {
    format: String,
    next_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordSet {
    next_id: ArtefactId,
    records: Vec<ArtefactRecord>,
}

impl Default for RecordSet {
    fn default() -> Self {
        Self { next_id: ArtefactId::FIRST, records: Vec::new() }
    }
}

impl RecordSet {
    fn insert(&mut self, record: ArtefactRecord) -> Result<()> {
        if self.records.iter().any(|existing| existing.id == record.id) {
            return Err(anyhow!("artefact {} already exists", record.id));
        }
        if record.id >= self.next_id {
            self.next_id = record.id.next();
        }
        self.records.push(record);
        Ok(())
    }

    fn get_by(&self, selector: Selector<'_>) -> Option<ArtefactRecord> {
        self.records.iter().find(|record| selector(record)).cloned()
    }

    fn update(&mut self, record: &ArtefactRecord, selector: Selector<'_>) -> Result<usize> {
        if let Some(existing) =
            self.records.iter().find(|existing| selector(existing) && existing.id != record.id)
        {
            return Err(anyhow!(
                "update would change artefact id {} to {}",
                existing.id,
                record.id
            ));
        }

        let mut replaced = 0_usize;
        for existing in self.records.iter_mut().filter(|existing| selector(existing)) {
            *existing = record.clone();
            replaced += 1;
        }
        Ok(replaced)
    }

    fn remove(&mut self, selector: Selector<'_>) -> usize {
        let before = self.records.len();
        self.records.retain(|record| !selector(record));
        before - self.records.len()
    }

    fn allocate_id(&mut self) -> ArtefactId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }
}

/// Volatile collection for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    set: RecordSet,
}

impl MemoryCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtefactCollection for MemoryCollection {
    fn insert(&mut self, record: ArtefactRecord) -> Result<()> {
        self.set.insert(record)
    }

    fn get_by(&self, selector: Selector<'_>) -> Result<Option<ArtefactRecord>> {
        Ok(self.set.get_by(selector))
    }

    fn update(&mut self, record: ArtefactRecord, selector: Selector<'_>) -> Result<usize> {
        self.set.update(&record, selector)
    }

    fn remove(&mut self, selector: Selector<'_>) -> Result<usize> {
        Ok(self.set.remove(selector))
    }

    fn all(&self) -> Result<Vec<ArtefactRecord>> {
        Ok(self.set.records.clone())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.set.records.len())
    }

    fn allocate_id(&mut self) -> Result<ArtefactId> {
        Ok(self.set.allocate_id())
    }
}

/// Line-delimited JSON collection backed by one file.
///
/// The first line is a header carrying the format tag and the id counter;
/// every following line is one record. Each mutation rewrites the file
/// through a temporary sibling and an atomic rename.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    set: RecordSet,
}

impl JsonlStore {
    /// Open the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self> {
        let set = if path.exists() { read_store_file(path)? } else { RecordSet::default() };
        tracing::debug!(
            path = %path.display(),
            records = set.records.len(),
            next_id = %set.next_id,
            "opened artefact store"
        );
        Ok(Self { path: path.to_path_buf(), set })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the records, persist it, then adopt it.
    fn commit<T>(&mut self, change: impl FnOnce(&mut RecordSet) -> Result<T>) -> Result<T> {
        let mut staged = self.set.clone();
        let value = change(&mut staged)?;
        write_store_file(&self.path, &staged)?;
        self.set = staged;
        Ok(value)
    }
}

impl ArtefactCollection for JsonlStore {
    fn insert(&mut self, record: ArtefactRecord) -> Result<()> {
        self.commit(|set| set.insert(record))
    }

    fn get_by(&self, selector: Selector<'_>) -> Result<Option<ArtefactRecord>> {
        Ok(self.set.get_by(selector))
    }

    fn update(&mut self, record: ArtefactRecord, selector: Selector<'_>) -> Result<usize> {
        self.commit(|set| set.update(&record, selector))
    }

    fn remove(&mut self, selector: Selector<'_>) -> Result<usize> {
        self.commit(|set| Ok(set.remove(selector)))
    }

    fn all(&self) -> Result<Vec<ArtefactRecord>> {
        Ok(self.set.records.clone())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.set.records.len())
    }

    fn allocate_id(&mut self) -> Result<ArtefactId> {
        self.commit(|set| Ok(set.allocate_id()))
    }
}

fn read_store_file(path: &Path) -> Result<RecordSet> {
    let file = File::open(path)
        .with_context(|| format!("failed to open artefact store {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut header: Option<StoreHeader> = None;
    let mut set = RecordSet::default();
    let mut seen = BTreeSet::new();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line
            .with_context(|| format!("failed to read line {line_no} from {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if header.is_none() {
            let parsed: StoreHeader = serde_json::from_str(trimmed).with_context(|| {
                format!("failed to parse store header on line {line_no} of {}", path.display())
            })?;
            if parsed.format != STORE_FORMAT {
                return Err(anyhow!(
                    "unsupported store format {:?} in {}; expected {STORE_FORMAT}",
                    parsed.format,
                    path.display()
                ));
            }
            header = Some(parsed);
            continue;
        }

        let record: ArtefactRecord = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse artefact on line {line_no} of {}", path.display())
        })?;
        if !seen.insert(record.id) {
            return Err(anyhow!(
                "duplicate artefact id {} on line {line_no} of {}",
                record.id,
                path.display()
            ));
        }
        set.records.push(record);
    }

    let Some(header) = header else {
        return Ok(set);
    };

    set.next_id = ArtefactId(header.next_id);
    if let Some(max_id) = seen.last() {
        if *max_id >= set.next_id {
            return Err(anyhow!(
                "store counter {} in {} is not above stored artefact id {max_id}",
                header.next_id,
                path.display()
            ));
        }
    }
    if set.next_id < ArtefactId::FIRST {
        return Err(anyhow!("store counter in {} must be >= 1", path.display()));
    }

    Ok(set)
}

fn write_store_file(path: &Path, set: &RecordSet) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create store directory {}", parent.display()))?;

    let temp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to create temporary file in {}", parent.display()))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        let header = StoreHeader { format: STORE_FORMAT.to_string(), next_id: set.next_id.get() };
        write_json_line(&mut writer, &header)?;
        for record in &set.records {
            write_json_line(&mut writer, record)?;
        }
        writer.flush().context("failed to flush artefact store")?;
    }
    temp.as_file().sync_all().context("failed to sync artefact store")?;
    temp.persist(path)
        .with_context(|| format!("failed to replace artefact store {}", path.display()))?;
    Ok(())
}

fn write_json_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let line = serde_json::to_string(value).context("failed to serialize store row")?;
    writer.write_all(line.as_bytes()).context("failed to write store row")?;
    writer.write_all(b"\n").context("failed to write store row")?;
    Ok(())
}
