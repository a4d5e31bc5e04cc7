//! CSV encoding of audit rows.

use std::io::Write;

use chrono::SecondsFormat;
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::Serialize;

use crate::provider::Volume;

/// Column header of the audit file.
pub const AUDIT_HEADER: [&str; 4] = ["VolumeId", "Size", "AvailabilityZone", "CreateTime"];

/// One audit row describing an unattached volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AuditRecord {
    /// Volume identifier.
    pub volume_id: String,
    /// Size in GiB.
    pub size: u32,
    /// Availability zone hosting the volume.
    pub availability_zone: String,
    /// Creation time, RFC 3339 in UTC with second precision.
    pub create_time: String,
}

impl From<&Volume> for AuditRecord {
    fn from(volume: &Volume) -> Self {
        Self {
            volume_id: volume.id.clone(),
            size: volume.size_gib,
            availability_zone: volume.availability_zone.clone(),
            create_time: volume
                .create_time
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Streams audit rows as unquoted, comma-separated lines.
pub struct AuditWriter<W: Write> {
    inner: csv::Writer<W>,
    rows: usize,
}

impl<W: Write> AuditWriter<W> {
    /// Wraps `out` and writes the header line.
    ///
    /// # Errors
    ///
    /// Returns [`csv::Error`] when the header cannot be written.
    pub fn new(out: W) -> Result<Self, csv::Error> {
        let mut inner = WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::Never)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(out);
        inner.write_record(AUDIT_HEADER)?;
        Ok(Self { inner, rows: 0 })
    }

    /// Appends one row for `volume`.
    ///
    /// # Errors
    ///
    /// Returns [`csv::Error`] when the row cannot be written.
    pub fn write_volume(&mut self, volume: &Volume) -> Result<(), csv::Error> {
        self.inner.serialize(AuditRecord::from(volume))?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes buffered output and returns the number of rows written,
    /// excluding the header.
    ///
    /// # Errors
    ///
    /// Returns [`csv::Error`] when flushing fails.
    pub fn finish(mut self) -> Result<usize, csv::Error> {
        self.inner.flush()?;
        Ok(self.rows)
    }
}
