//! Symbol interner: string → dense 32-bit id, append-only on disk.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, TdbError};

/// Appends symbols to `data/<table>/<sym_universe>.<ext>` in insertion
/// order, one per line, no trailing newline at end of file. In-memory, a
/// `HashMap<String, i32>` maps name to id, and a parallel `Vec<String>`
/// maps `id - 1` to name. Ids are 1-based; id 0 is reserved and never
/// issued.
pub struct SymbolInterner {
    path: PathBuf,
    file: File,
    names: Vec<String>,
    ids: HashMap<String, i32>,
}

impl SymbolInterner {
    /// Opens (creating if absent) the symbol file at `path`, replaying its
    /// contents to rebuild the interner.
    pub fn open(path: impl Into<PathBuf>) -> Result<SymbolInterner> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TdbError::io(&path, e))?;
        }

        let mut names = Vec::new();
        let mut ids = HashMap::new();
        if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| TdbError::io(&path, e))?;
            for line in content.split('\n') {
                if line.is_empty() {
                    continue;
                }
                let id = names.len() as i32 + 1;
                names.push(line.to_string());
                ids.insert(line.to_string(), id);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TdbError::io(&path, e))?;

        Ok(SymbolInterner {
            path,
            file,
            names,
            ids,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the existing id if `symbol` was seen before; otherwise
    /// appends it to the symbol file (writing a newline separator before
    /// every symbol after the first), and assigns it `vector.len()` as its
    /// id after the push, so ids start at 1.
    pub fn intern(&mut self, symbol: &str) -> Result<i32> {
        if let Some(&id) = self.ids.get(symbol) {
            return Ok(id);
        }

        if !self.names.is_empty() {
            self.file
                .write_all(b"\n")
                .map_err(|e| TdbError::io(&self.path, e))?;
        }
        self.file
            .write_all(symbol.as_bytes())
            .map_err(|e| TdbError::io(&self.path, e))?;
        self.file.sync_all().map_err(|e| TdbError::io(&self.path, e))?;

        self.names.push(symbol.to_string());
        let id = self.names.len() as i32;
        self.ids.insert(symbol.to_string(), id);
        Ok(id)
    }

    /// Returns the id of `symbol` if it has already been interned, without
    /// interning it.
    pub fn lookup_by_name(&self, symbol: &str) -> Option<i32> {
        self.ids.get(symbol).copied()
    }

    /// Returns `vector[id-1]`. Fails with `NotFound` if out of range.
    pub fn lookup(&self, id: i32) -> Result<&str> {
        if id < 1 {
            return Err(TdbError::NotFound(format!("symbol id {id} is reserved or negative")));
        }
        self.names
            .get(id as usize - 1)
            .map(|s| s.as_str())
            .ok_or_else(|| TdbError::NotFound(format!("no symbol with id {id}")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
