use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use log::debug;

use crate::crypto::PasswordSupplier;
use crate::error::{ZipError, ZipResult};
use crate::io::{ReadAt, ReadAtCursor, SplitReader};
use crate::stream::{EntryReader, ReadOptions};

use super::model::{ArchiveModel, FileHeader};
use super::parser::ZipParser;

/// Random-access view of an archive, backed by its central directory.
pub struct ZipArchive<R: ReadAt> {
    reader: R,
    model: ArchiveModel,
    options: ReadOptions,
}

impl ZipArchive<SplitReader> {
    /// Opens `path` along with any split disks next to it.
    pub fn open(path: &Path) -> ZipResult<Self> {
        Self::open_with(path, ReadOptions::default())
    }

    pub fn open_with(path: &Path, options: ReadOptions) -> ZipResult<Self> {
        Self::new(SplitReader::open(path)?, options)
    }
}

impl<R: ReadAt> ZipArchive<R> {
    pub fn new(reader: R, options: ReadOptions) -> ZipResult<Self> {
        let model = ZipParser::new(&reader, options.charset).parse()?;
        debug!(
            "archive with {} entries, zip64: {}, split: {}",
            model.len(),
            model.is_zip64(),
            model.split_archive
        );
        Ok(Self {
            reader,
            model,
            options,
        })
    }

    pub fn model(&self) -> &ArchiveModel {
        &self.model
    }

    /// List all entries in central directory order.
    pub fn entries(&self) -> &[FileHeader] {
        &self.model.entries
    }

    pub fn len(&self) -> usize {
        self.model.len()
    }

    pub fn is_empty(&self) -> bool {
        self.model.is_empty()
    }

    pub fn comment(&self) -> &[u8] {
        self.model.comment()
    }

    pub fn by_name(&self, name: &str) -> Option<&FileHeader> {
        self.model.find(name).map(|(_, entry)| entry)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.model.find(name).map(|(index, _)| index)
    }

    /// Opens entry `index` for reading. The returned reader verifies the
    /// entry when its last byte is read.
    pub fn by_index<'a>(
        &'a self,
        index: usize,
        passwords: &'a dyn PasswordSupplier,
    ) -> ZipResult<EntryReader<'a, ReadAtCursor<'a, R>>> {
        let entry = self
            .model
            .entries
            .get(index)
            .ok_or(ZipError::State("entry index out of range"))?;
        let offset = ZipParser::new(&self.reader, self.options.charset).local_header_offset(entry)?;
        let mut reader = EntryReader::new(
            ReadAtCursor::new(&self.reader, offset),
            passwords,
            self.options.clone(),
        );
        reader.next_entry_with(entry)?;
        Ok(reader)
    }

    /// Checks the central directory, trailing records and local headers
    /// against each other without decoding any payload.
    pub fn check_layout(&self) -> ZipResult<()> {
        ZipParser::new(&self.reader, self.options.charset).validate(&self.model)
    }

    /// Checks the archive layout, then decodes every entry.
    pub fn validate(&self, passwords: &dyn PasswordSupplier) -> ZipResult<()> {
        self.check_layout()?;
        for index in 0..self.model.len() {
            let mut reader = self.by_index(index, passwords)?;
            io::copy(&mut reader, &mut io::sink())?;
            reader.close_entry()?;
        }
        Ok(())
    }

    /// Extract file data to memory.
    pub fn extract_to_memory(
        &self,
        index: usize,
        passwords: &dyn PasswordSupplier,
    ) -> ZipResult<Vec<u8>> {
        let mut reader = self.by_index(index, passwords)?;
        let hint = reader
            .current_entry()
            .map_or(0, |entry| entry.core.uncompressed_size);
        let mut data = Vec::with_capacity(hint.min(64 * 1024 * 1024) as usize);
        reader.read_to_end(&mut data)?;
        reader.close_entry()?;
        Ok(data)
    }

    /// Streams entry `index` into `out`; returns the bytes written.
    pub fn extract_to_writer<W: Write>(
        &self,
        index: usize,
        passwords: &dyn PasswordSupplier,
        out: &mut W,
    ) -> ZipResult<u64> {
        let mut reader = self.by_index(index, passwords)?;
        let written = io::copy(&mut reader, out)?;
        reader.close_entry()?;
        Ok(written)
    }

    /// Extract entry `index` to `output_path`, creating parent directories.
    /// A file left behind by a failed extraction is removed.
    pub fn extract_to_file(
        &self,
        index: usize,
        passwords: &dyn PasswordSupplier,
        output_path: &Path,
    ) -> ZipResult<()> {
        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(output_path)?;
        let result = self
            .extract_to_writer(index, passwords, &mut file)
            .and_then(|_| file.flush().map_err(ZipError::from));
        if result.is_err() {
            drop(file);
            let _ = fs::remove_file(output_path);
        }
        result
    }

    /// Releases the archive and every disk handle it holds.
    pub fn close(self) {
        debug!("archive closed");
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}
