//! Transfer packaging: one XML document per ZIP archive, plus the MD5 digest
//! the remote side verifies on receipt.

use std::io::{Cursor, Read, Write};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use einvoice_core::DomainError;

use crate::error::UblError;

/// Payload encoding announced alongside the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDataType {
    Zip,
}

impl FileDataType {
    pub fn code(&self) -> &'static str {
        match self {
            FileDataType::Zip => "ZIP",
        }
    }
}

/// Archive ready for upload.
///
/// `digest` is the lowercase hex MD5 of `payload` and is fixed at packaging
/// time; [`verify`] recomputes it before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFile {
    file_name: String,
    payload: Vec<u8>,
    digest: String,
    data_type: FileDataType,
    target_alias: Option<String>,
    direct_send: bool,
}

impl TransferFile {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn data_type(&self) -> FileDataType {
        self.data_type
    }

    pub fn target_alias(&self) -> Option<&str> {
        self.target_alias.as_deref()
    }

    pub fn is_direct_send(&self) -> bool {
        self.direct_send
    }

    /// Route to a specific receiver mailbox alias instead of the default one.
    pub fn addressed_to(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self.target_alias = if alias.trim().is_empty() {
            None
        } else {
            Some(alias.trim().to_string())
        };
        self
    }

    pub fn direct_send(mut self, direct: bool) -> Self {
        self.direct_send = direct;
        self
    }
}

/// Lowercase hex MD5 of `bytes`.
pub fn content_digest(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Package `xml` as `<base>.xml` inside `<base>.zip`.
///
/// `file_name` may be given with or without an extension. Entry timestamps
/// are fixed, so identical input always yields identical bytes.
pub fn package(xml: &str, file_name: &str) -> Result<TransferFile, UblError> {
    let base = base_name(file_name)?;
    let entry_name = format!("{base}.xml");

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(entry_name.as_str(), options)
        .map_err(|e| UblError::Archive(e.to_string()))?;
    writer
        .write_all(xml.as_bytes())
        .map_err(|e| UblError::Archive(e.to_string()))?;
    let payload = writer
        .finish()
        .map_err(|e| UblError::Archive(e.to_string()))?
        .into_inner();

    let digest = content_digest(&payload);
    debug!(file_name = %base, bytes = payload.len(), %digest, "transfer file packaged");

    Ok(TransferFile {
        file_name: format!("{base}.zip"),
        payload,
        digest,
        data_type: FileDataType::Zip,
        target_alias: None,
        direct_send: false,
    })
}

/// Recompute the digest and compare it with the one recorded at packaging.
pub fn verify(file: &TransferFile) -> Result<(), UblError> {
    let actual = content_digest(&file.payload);
    if actual.eq_ignore_ascii_case(&file.digest) {
        Ok(())
    } else {
        Err(UblError::DigestMismatch {
            expected: file.digest.clone(),
            actual,
        })
    }
}

/// Read the single XML document back out of a ZIP payload.
pub fn unpack(payload: &[u8]) -> Result<String, UblError> {
    let mut archive =
        ZipArchive::new(Cursor::new(payload)).map_err(|e| UblError::Archive(e.to_string()))?;
    if archive.len() != 1 {
        return Err(UblError::Archive(format!(
            "expected exactly one entry, found {}",
            archive.len()
        )));
    }
    let mut entry = archive
        .by_index(0)
        .map_err(|e| UblError::Archive(e.to_string()))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| UblError::Archive(e.to_string()))?;
    Ok(xml)
}

fn base_name(file_name: &str) -> Result<String, UblError> {
    let trimmed = file_name.trim();
    let base = match trimmed.rsplit_once('.') {
        Some((stem, ext))
            if ext.eq_ignore_ascii_case("zip") || ext.eq_ignore_ascii_case("xml") =>
        {
            stem
        }
        _ => trimmed,
    };
    if base.is_empty() || base.contains(['/', '\\']) {
        return Err(DomainError::validation(format!("invalid transfer file name: {file_name:?}")).into());
    }
    Ok(base.to_string())
}
