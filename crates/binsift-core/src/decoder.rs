//! Binlog event decoder
//!
//! Turns raw replication events into logical [`RowChange`] values:
//!
//! - FORMAT_DESCRIPTION records the checksum algorithm
//! - ROTATE updates the current log file name
//! - TABLE_MAP populates the table registry consulted by rows events
//! - WRITE/UPDATE/DELETE_ROWS (v1 and v2) emit one change per row image
//!   (per before/after pair for updates)
//! - QUERY emits a single query event with the action derived from the
//!   SQL keyword prefix
//! - XID, heartbeats and unknown events emit nothing
//!
//! Columns are named `col_{n}` from the included-columns bitmap; real
//! names are resolved later by the metadata cache. A malformed event
//! yields a `Decode` error the caller skips and counts; it never aborts
//! the stream.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::event::{Action, RowChange, RowImage};
use crate::value::ColumnValue;

/// Binlog event types we recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Query,
    Stop,
    Rotate,
    FormatDescription,
    Xid,
    TableMap,
    WriteRowsV1,
    UpdateRowsV1,
    DeleteRowsV1,
    Heartbeat,
    WriteRowsV2,
    UpdateRowsV2,
    DeleteRowsV2,
    Gtid,
    AnonymousGtid,
    PreviousGtids,
    Unknown(u8),
}

impl EventType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            2 => EventType::Query,
            3 => EventType::Stop,
            4 => EventType::Rotate,
            15 => EventType::FormatDescription,
            16 => EventType::Xid,
            19 => EventType::TableMap,
            23 => EventType::WriteRowsV1,
            24 => EventType::UpdateRowsV1,
            25 => EventType::DeleteRowsV1,
            27 => EventType::Heartbeat,
            30 => EventType::WriteRowsV2,
            31 => EventType::UpdateRowsV2,
            32 => EventType::DeleteRowsV2,
            33 => EventType::Gtid,
            34 => EventType::AnonymousGtid,
            35 => EventType::PreviousGtids,
            other => EventType::Unknown(other),
        }
    }

    pub fn name(&self) -> String {
        match self {
            EventType::Unknown(v) => format!("Unknown({})", v),
            other => format!("{:?}", other),
        }
    }

    pub fn is_rows_event(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsV1
                | EventType::WriteRowsV2
                | EventType::UpdateRowsV1
                | EventType::UpdateRowsV2
                | EventType::DeleteRowsV1
                | EventType::DeleteRowsV2
        )
    }
}

/// MySQL column types as they appear in TABLE_MAP events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    Varchar,
    Bit,
    Timestamp2,
    DateTime2,
    Time2,
    Json,
    NewDecimal,
    Enum,
    Set,
    TinyBlob,
    MediumBlob,
    LongBlob,
    Blob,
    VarString,
    String,
    Geometry,
}

impl ColumnType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float,
            5 => ColumnType::Double,
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            15 => ColumnType::Varchar,
            16 => ColumnType::Bit,
            17 => ColumnType::Timestamp2,
            18 => ColumnType::DateTime2,
            19 => ColumnType::Time2,
            245 => ColumnType::Json,
            246 => ColumnType::NewDecimal,
            247 => ColumnType::Enum,
            248 => ColumnType::Set,
            249 => ColumnType::TinyBlob,
            250 => ColumnType::MediumBlob,
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob,
            253 => ColumnType::VarString,
            254 => ColumnType::String,
            255 => ColumnType::Geometry,
            _ => ColumnType::VarString,
        }
    }
}

/// Common 19-byte event header.
#[derive(Debug, Clone)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: EventType,
    pub server_id: u32,
    pub event_length: u32,
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub const SIZE: usize = 19;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self {
            timestamp: r.u32_le()?,
            event_type: EventType::from_u8(r.u8()?),
            server_id: r.u32_le()?,
            event_length: r.u32_le()?,
            next_position: r.u32_le()?,
            flags: r.u16_le()?,
        })
    }
}

/// One TABLE_MAP registration: a session-scoped numeric id bound to a
/// qualified table and its column layout.
#[derive(Debug, Clone)]
pub struct TableMapEntry {
    pub table_id: u64,
    pub schema: String,
    pub table: String,
    pub column_count: usize,
    pub column_types: Vec<ColumnType>,
    pub column_metadata: Vec<u16>,
}

/// Stateful decoder. Owns the table registry exclusively; emitted events
/// carry resolved names and never reference the registry.
pub struct EventDecoder {
    table_map: HashMap<u64, TableMapEntry>,
    checksum_crc32: bool,
    log_file: String,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder {
    pub fn new() -> Self {
        Self {
            table_map: HashMap::new(),
            checksum_crc32: false,
            log_file: String::new(),
        }
    }

    /// Set the current log file name (for offline files, the file being read).
    pub fn set_log_file(&mut self, name: impl Into<String>) {
        self.log_file = name.into();
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    /// Registered table-map entry, if the identifier is live.
    pub fn table_entry(&self, table_id: u64) -> Option<&TableMapEntry> {
        self.table_map.get(&table_id)
    }

    /// Decode one raw event into zero or more row changes.
    pub fn decode(&mut self, raw: &Bytes) -> Result<Vec<RowChange>> {
        let header = EventHeader::parse(raw)?;
        let mut payload = &raw[EventHeader::SIZE.min(raw.len())..];

        // CRC32 checksums trail every event once the format description
        // announces them; the trailer is not part of the payload.
        if self.checksum_crc32
            && header.event_type != EventType::FormatDescription
            && payload.len() >= 4
        {
            payload = &payload[..payload.len() - 4];
        }

        trace!(
            event_type = %header.event_type.name(),
            len = payload.len(),
            "decoding event"
        );

        match header.event_type {
            EventType::FormatDescription => {
                self.decode_format_description(payload)?;
                Ok(vec![])
            }
            EventType::Rotate => {
                self.decode_rotate(payload)?;
                Ok(vec![])
            }
            EventType::TableMap => {
                let entry = decode_table_map(payload)?;
                self.table_map.insert(entry.table_id, entry);
                Ok(vec![])
            }
            EventType::WriteRowsV1 | EventType::WriteRowsV2 => {
                self.decode_rows(&header, payload, raw, Action::Insert)
            }
            EventType::UpdateRowsV1 | EventType::UpdateRowsV2 => {
                self.decode_rows(&header, payload, raw, Action::Update)
            }
            EventType::DeleteRowsV1 | EventType::DeleteRowsV2 => {
                self.decode_rows(&header, payload, raw, Action::Delete)
            }
            EventType::Query => Ok(vec![self.decode_query(&header, payload, raw)?]),
            EventType::Xid | EventType::Heartbeat | EventType::Stop => Ok(vec![]),
            other => {
                debug!(event_type = %other.name(), "skipping unhandled event type");
                Ok(vec![])
            }
        }
    }

    fn decode_format_description(&mut self, payload: &[u8]) -> Result<()> {
        let mut r = Reader::new(payload);
        let binlog_version = r.u16_le()?;
        let server_version = r.take(50)?;
        let server_version = String::from_utf8_lossy(server_version)
            .trim_end_matches('\0')
            .to_string();
        // The checksum algorithm byte sits before the event's own 4-byte
        // checksum at the very end of the payload.
        let alg = if payload.len() >= 5 {
            payload[payload.len() - 5]
        } else {
            0
        };
        self.checksum_crc32 = alg == 1;
        debug!(
            binlog_version,
            server_version = %server_version,
            checksum_crc32 = self.checksum_crc32,
            "format description"
        );
        Ok(())
    }

    fn decode_rotate(&mut self, payload: &[u8]) -> Result<()> {
        let mut r = Reader::new(payload);
        let _position = r.u64_le()?;
        let name = String::from_utf8_lossy(r.rest())
            .trim_end_matches('\0')
            .to_string();
        if !name.is_empty() {
            debug!(next = %name, "log rotation");
            self.log_file = name;
        }
        Ok(())
    }

    fn decode_query(&self, header: &EventHeader, payload: &[u8], raw: &Bytes) -> Result<RowChange> {
        let mut r = Reader::new(payload);
        let _thread_id = r.u32_le()?;
        let _exec_time = r.u32_le()?;
        let schema_len = r.u8()? as usize;
        let _error_code = r.u16_le()?;
        let status_vars_len = r.u16_le()? as usize;
        r.skip(status_vars_len)?;
        let schema = String::from_utf8_lossy(r.take(schema_len)?).to_string();
        r.skip(1)?; // null terminator
        let sql = String::from_utf8_lossy(r.rest()).to_string();

        let mut ev = self.base_event(header, raw);
        ev.database = schema;
        ev.action = Action::from_sql(&sql);
        ev.sql = Some(sql);
        Ok(ev)
    }

    fn decode_rows(
        &self,
        header: &EventHeader,
        payload: &[u8],
        raw: &Bytes,
        action: Action,
    ) -> Result<Vec<RowChange>> {
        let is_v2 = matches!(
            header.event_type,
            EventType::WriteRowsV2 | EventType::UpdateRowsV2 | EventType::DeleteRowsV2
        );
        let is_update = action == Action::Update;

        let mut r = Reader::new(payload);
        let table_id = r.u48_le()?;
        let _flags = r.u16_le()?;

        if is_v2 {
            let extra_len = r.u16_le()? as usize;
            if extra_len > 2 {
                r.skip(extra_len - 2)?;
            }
        }

        let column_count = r.packed_uint()? as usize;
        let bitmap_len = column_count.div_ceil(8);
        let before_bitmap = r.take(bitmap_len)?.to_vec();
        let after_bitmap = if is_update {
            Some(r.take(bitmap_len)?.to_vec())
        } else {
            None
        };

        let entry = self.table_map.get(&table_id).ok_or_else(|| {
            Error::decode(format!("rows event without table map (id {})", table_id))
        })?;

        let mut changes = Vec::new();
        while r.has_remaining() {
            let first = self.decode_row_image(&mut r, entry, column_count, &before_bitmap)?;

            let mut ev = self.base_event(header, raw);
            ev.database = entry.schema.clone();
            ev.table = entry.table.clone();
            ev.action = action;

            match action {
                Action::Insert => {
                    ev.after = first;
                }
                Action::Delete => {
                    ev.before = first;
                }
                Action::Update => {
                    // Rows come in (before, after) pairs.
                    let bitmap = after_bitmap.as_deref().unwrap_or(&before_bitmap);
                    let second = self.decode_row_image(&mut r, entry, column_count, bitmap)?;
                    ev.before = first;
                    ev.after = second;
                }
                _ => unreachable!("rows events are insert/update/delete"),
            }
            changes.push(ev);
        }

        Ok(changes)
    }

    fn decode_row_image(
        &self,
        r: &mut Reader<'_>,
        entry: &TableMapEntry,
        column_count: usize,
        included: &[u8],
    ) -> Result<RowImage> {
        let present = count_set_bits(included);
        let null_bitmap = r.take(present.div_ceil(8))?.to_vec();

        let mut image = RowImage::with_capacity(present);
        let mut value_idx = 0;

        for col_idx in 0..column_count {
            if !is_bit_set(included, col_idx) {
                continue;
            }

            let name = format!("col_{}", col_idx);
            if is_bit_set(&null_bitmap, value_idx) {
                image.insert(name, ColumnValue::Null);
                value_idx += 1;
                continue;
            }

            let col_type = entry
                .column_types
                .get(col_idx)
                .copied()
                .unwrap_or(ColumnType::VarString);
            let metadata = entry.column_metadata.get(col_idx).copied().unwrap_or(0);

            image.insert(name, decode_column_value(r, col_type, metadata)?);
            value_idx += 1;
        }

        Ok(image)
    }

    fn base_event(&self, header: &EventHeader, raw: &Bytes) -> RowChange {
        let timestamp: DateTime<Utc> = Utc
            .timestamp_opt(header.timestamp as i64, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        RowChange {
            timestamp,
            event_type: header.event_type.name(),
            server_id: header.server_id,
            log_pos: header.next_position,
            log_file: self.log_file.clone(),
            database: String::new(),
            table: String::new(),
            action: Action::Other,
            sql: None,
            before: RowImage::new(),
            after: RowImage::new(),
            raw: raw.clone(),
        }
    }
}

fn decode_table_map(payload: &[u8]) -> Result<TableMapEntry> {
    let mut r = Reader::new(payload);
    let table_id = r.u48_le()?;
    let _flags = r.u16_le()?;

    let schema_len = r.u8()? as usize;
    let schema = String::from_utf8_lossy(r.take(schema_len)?).to_string();
    r.skip(1)?;

    let table_len = r.u8()? as usize;
    let table = String::from_utf8_lossy(r.take(table_len)?).to_string();
    r.skip(1)?;

    let column_count = r.packed_uint()? as usize;
    let mut column_types = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        column_types.push(ColumnType::from_u8(r.u8()?));
    }

    let _metadata_len = r.packed_uint()?;
    let column_metadata = decode_column_metadata(&column_types, &mut r)?;

    // Nullability bitmap follows; the row decoder relies on per-row null
    // bitmaps instead, so it is skipped.

    Ok(TableMapEntry {
        table_id,
        schema,
        table,
        column_count,
        column_types,
        column_metadata,
    })
}

fn decode_column_metadata(column_types: &[ColumnType], r: &mut Reader<'_>) -> Result<Vec<u16>> {
    let mut metadata = Vec::with_capacity(column_types.len());

    for col_type in column_types {
        let meta = match col_type {
            ColumnType::Float
            | ColumnType::Double
            | ColumnType::Blob
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Json
            | ColumnType::Geometry => r.u8()? as u16,
            ColumnType::Bit | ColumnType::Varchar | ColumnType::VarString => r.u16_le()?,
            ColumnType::NewDecimal => {
                let precision = r.u8()?;
                let scale = r.u8()?;
                ((precision as u16) << 8) | (scale as u16)
            }
            ColumnType::String | ColumnType::Enum | ColumnType::Set => r.u16_le()?,
            ColumnType::Time2 | ColumnType::DateTime2 | ColumnType::Timestamp2 => r.u8()? as u16,
            _ => 0,
        };
        metadata.push(meta);
    }

    Ok(metadata)
}

fn decode_column_value(r: &mut Reader<'_>, col_type: ColumnType, metadata: u16) -> Result<ColumnValue> {
    match col_type {
        ColumnType::Tiny => Ok(ColumnValue::SignedInt(r.i8()? as i64)),
        ColumnType::Short => Ok(ColumnValue::SignedInt(r.i16_le()? as i64)),
        ColumnType::Int24 => {
            let val = r.u24_le()?;
            let signed = if val & 0x80_0000 != 0 {
                (val | 0xFF00_0000) as i32
            } else {
                val as i32
            };
            Ok(ColumnValue::SignedInt(signed as i64))
        }
        ColumnType::Long => Ok(ColumnValue::SignedInt(r.i32_le()? as i64)),
        ColumnType::LongLong => Ok(ColumnValue::SignedInt(r.i64_le()?)),
        ColumnType::Float => Ok(ColumnValue::Float(r.f32_le()?)),
        ColumnType::Double => Ok(ColumnValue::Double(r.f64_le()?)),
        ColumnType::Year => Ok(ColumnValue::Year(r.u8()? as u16 + 1900)),
        ColumnType::Date => {
            let packed = r.u24_le()?;
            Ok(ColumnValue::Date {
                year: ((packed >> 9) & 0x7FFF) as u16,
                month: ((packed >> 5) & 0x0F) as u8,
                day: (packed & 0x1F) as u8,
            })
        }
        ColumnType::Time => {
            let packed = r.u24_le()?;
            Ok(ColumnValue::Time {
                hours: (packed / 10000) as u8,
                minutes: ((packed / 100) % 100) as u8,
                seconds: (packed % 100) as u8,
                microseconds: 0,
                negative: false,
            })
        }
        ColumnType::DateTime => {
            let packed = r.u64_le()?;
            Ok(ColumnValue::DateTime {
                year: (packed / 10_000_000_000) as u16,
                month: ((packed / 100_000_000) % 100) as u8,
                day: ((packed / 1_000_000) % 100) as u8,
                hour: ((packed / 10_000) % 100) as u8,
                minute: ((packed / 100) % 100) as u8,
                second: (packed % 100) as u8,
                microsecond: 0,
            })
        }
        ColumnType::Timestamp => Ok(ColumnValue::Timestamp {
            secs: r.u32_le()?,
            micros: 0,
        }),
        ColumnType::Timestamp2 => {
            let secs = r.be_uint(4)? as u32;
            let micros = read_fractional_seconds(r, metadata as u8)?;
            Ok(ColumnValue::Timestamp { secs, micros })
        }
        ColumnType::DateTime2 => {
            let packed = r.be_uint(5)?;
            let micros = read_fractional_seconds(r, metadata as u8)?;
            let year_month = (packed >> 22) & 0x1FFFF;
            Ok(ColumnValue::DateTime {
                year: (year_month / 13) as u16,
                month: (year_month % 13) as u8,
                day: ((packed >> 17) & 0x1F) as u8,
                hour: ((packed >> 12) & 0x1F) as u8,
                minute: ((packed >> 6) & 0x3F) as u8,
                second: (packed & 0x3F) as u8,
                microsecond: micros,
            })
        }
        ColumnType::Time2 => {
            let packed = r.be_uint(3)? as u32;
            let micros = read_fractional_seconds(r, metadata as u8)?;
            let negative = (packed & 0x80_0000) == 0;
            let value = if negative {
                0x80_0000 - (packed & 0x7F_FFFF)
            } else {
                packed & 0x7F_FFFF
            };
            Ok(ColumnValue::Time {
                hours: ((value >> 12) & 0x3FF) as u8,
                minutes: ((value >> 6) & 0x3F) as u8,
                seconds: (value & 0x3F) as u8,
                microseconds: micros,
                negative,
            })
        }
        ColumnType::Varchar | ColumnType::VarString => {
            let len = if metadata < 256 {
                r.u8()? as usize
            } else {
                r.u16_le()? as usize
            };
            Ok(ColumnValue::Text(
                String::from_utf8_lossy(r.take(len)?).to_string(),
            ))
        }
        ColumnType::String => {
            let real_type = (metadata >> 8) as u8;
            let max_len = metadata & 0xFF;

            if real_type == 247 {
                // ENUM packed into the string type
                let val = if max_len == 1 {
                    r.u8()? as u16
                } else {
                    r.u16_le()?
                };
                Ok(ColumnValue::Enum(val))
            } else if real_type == 248 {
                // SET packed into the string type
                let byte_count = max_len.div_ceil(8) as usize;
                let mut val = 0u64;
                for i in 0..byte_count {
                    val |= (r.u8()? as u64) << (i * 8);
                }
                Ok(ColumnValue::Set(val))
            } else {
                let len = if max_len < 256 {
                    r.u8()? as usize
                } else {
                    r.u16_le()? as usize
                };
                Ok(ColumnValue::Text(
                    String::from_utf8_lossy(r.take(len)?).to_string(),
                ))
            }
        }
        ColumnType::Blob
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Geometry => {
            let len = r.lenenc_len(metadata as usize)?;
            Ok(ColumnValue::Bytes(r.take(len)?.to_vec()))
        }
        ColumnType::Json => {
            // Stored in MySQL's internal binary JSON format; surfaced as an
            // opaque blob rather than a decoded document.
            let len = r.lenenc_len(metadata as usize)?;
            Ok(ColumnValue::Bytes(r.take(len)?.to_vec()))
        }
        ColumnType::NewDecimal => {
            let precision = (metadata >> 8) as usize;
            let scale = (metadata & 0xFF) as usize;
            Ok(ColumnValue::Decimal(decode_decimal(r, precision, scale)?))
        }
        ColumnType::Bit => {
            let nbits = ((metadata >> 8) * 8 + (metadata & 0xFF)) as usize;
            Ok(ColumnValue::Bit(r.take(nbits.div_ceil(8))?.to_vec()))
        }
        ColumnType::Enum => {
            let val = if metadata == 1 {
                r.u8()? as u16
            } else {
                r.u16_le()?
            };
            Ok(ColumnValue::Enum(val))
        }
        ColumnType::Set => {
            let byte_count = metadata as usize;
            let mut val = 0u64;
            for i in 0..byte_count.min(8) {
                val |= (r.u8()? as u64) << (i * 8);
            }
            Ok(ColumnValue::Set(val))
        }
        ColumnType::Null => Ok(ColumnValue::Null),
        _ => {
            let len = r.u8()? as usize;
            Ok(ColumnValue::Bytes(r.take(len)?.to_vec()))
        }
    }
}

fn read_fractional_seconds(r: &mut Reader<'_>, fsp: u8) -> Result<u32> {
    let fsp = fsp.min(6) as u32;
    let bytes = (fsp as usize).div_ceil(2);
    let mut val = 0u32;
    for _ in 0..bytes {
        val = (val << 8) | (r.u8()? as u32);
    }
    Ok(val * 10u32.pow(6 - fsp))
}

/// MySQL packed-decimal to decimal string.
fn decode_decimal(r: &mut Reader<'_>, precision: usize, scale: usize) -> Result<String> {
    let int_digits = precision.saturating_sub(scale);
    let int_words = int_digits / 9;
    let int_leftover = int_digits % 9;
    let frac_words = scale / 9;
    let frac_leftover = scale % 9;

    let leftover_bytes = |digits: usize| -> usize {
        match digits {
            0 => 0,
            1..=2 => 1,
            3..=4 => 2,
            5..=6 => 3,
            _ => 4,
        }
    };

    let total = leftover_bytes(int_leftover) + int_words * 4 + frac_words * 4
        + leftover_bytes(frac_leftover);
    let mut bytes = r.take(total)?.to_vec();
    if bytes.is_empty() {
        return Ok("0".to_string());
    }

    // The sign bit is stored inverted; negatives are complemented so the
    // encoding sorts bytewise.
    let negative = (bytes[0] & 0x80) == 0;
    bytes[0] ^= 0x80;
    if negative {
        for b in bytes.iter_mut() {
            *b = !*b;
        }
    }

    let mut br = Reader::new(&bytes);
    let mut int_part = String::new();

    if leftover_bytes(int_leftover) > 0 {
        let val = br.be_uint(leftover_bytes(int_leftover))? as u32;
        if val > 0 || int_words == 0 {
            int_part.push_str(&val.to_string());
        }
    }

    for _ in 0..int_words {
        let val = br.be_uint(4)? as u32;
        if int_part.is_empty() {
            if val != 0 {
                int_part.push_str(&val.to_string());
            }
        } else {
            int_part.push_str(&format!("{:09}", val));
        }
    }

    if int_part.is_empty() {
        int_part.push('0');
    }

    let mut result = String::new();
    if negative {
        result.push('-');
    }
    result.push_str(&int_part);

    if scale > 0 {
        result.push('.');
        for _ in 0..frac_words {
            let val = br.be_uint(4)? as u32;
            result.push_str(&format!("{:09}", val));
        }
        if leftover_bytes(frac_leftover) > 0 {
            let val = br.be_uint(leftover_bytes(frac_leftover))? as u32;
            result.push_str(&format!("{:0width$}", val, width = frac_leftover));
        }
    }

    Ok(result)
}

fn count_set_bits(bitmap: &[u8]) -> usize {
    bitmap.iter().map(|b| b.count_ones() as usize).sum()
}

fn is_bit_set(bitmap: &[u8], idx: usize) -> bool {
    let byte_idx = idx / 8;
    byte_idx < bitmap.len() && (bitmap[byte_idx] & (1 << (idx % 8))) != 0
}

/// Bounds-checked little reader over an event payload. Running past the
/// end is a decode error, never a panic.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn has_remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::decode(format!(
                "truncated event: need {} bytes, have {}",
                n,
                self.remaining()
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.need(n)?;
        self.pos += n;
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    fn u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn i16_le(&mut self) -> Result<i16> {
        Ok(self.u16_le()? as i16)
    }

    fn u24_le(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(b[0] as u32 | ((b[1] as u32) << 8) | ((b[2] as u32) << 16))
    }

    fn u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32_le(&mut self) -> Result<i32> {
        Ok(self.u32_le()? as i32)
    }

    fn u48_le(&mut self) -> Result<u64> {
        let b = self.take(6)?;
        Ok(b[0] as u64
            | ((b[1] as u64) << 8)
            | ((b[2] as u64) << 16)
            | ((b[3] as u64) << 24)
            | ((b[4] as u64) << 32)
            | ((b[5] as u64) << 40))
    }

    fn u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64_le(&mut self) -> Result<i64> {
        Ok(self.u64_le()? as i64)
    }

    fn f32_le(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn be_uint(&mut self, n: usize) -> Result<u64> {
        let b = self.take(n)?;
        let mut val = 0u64;
        for &byte in b {
            val = (val << 8) | byte as u64;
        }
        Ok(val)
    }

    /// MySQL length-encoded integer.
    fn packed_uint(&mut self) -> Result<u64> {
        let first = self.u8()?;
        match first {
            0..=250 => Ok(first as u64),
            252 => Ok(self.u16_le()? as u64),
            253 => Ok(self.u24_le()? as u64),
            254 => self.u64_le(),
            other => Err(Error::decode(format!("invalid packed integer: {}", other))),
        }
    }

    /// Blob length with a metadata-specified width (1-4 bytes).
    fn lenenc_len(&mut self, width: usize) -> Result<usize> {
        Ok(match width {
            1 => self.u8()? as usize,
            2 => self.u16_le()? as usize,
            3 => self.u24_le()? as usize,
            4 => self.u32_le()? as usize,
            _ => self.u8()? as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(event_type: u8, payload_len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(EventHeader::SIZE + payload_len);
        out.extend_from_slice(&1_700_000_000u32.to_le_bytes()); // timestamp
        out.push(event_type);
        out.extend_from_slice(&1u32.to_le_bytes()); // server_id
        out.extend_from_slice(&((EventHeader::SIZE + payload_len) as u32).to_le_bytes());
        out.extend_from_slice(&4096u32.to_le_bytes()); // next_position
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out
    }

    fn event(event_type: u8, payload: &[u8]) -> Bytes {
        let mut out = header_bytes(event_type, payload.len());
        out.extend_from_slice(payload);
        Bytes::from(out)
    }

    /// TABLE_MAP for (`testdb`.`users`): col_0 LONG, col_1 VARCHAR(40).
    fn table_map_payload(table_id: u64) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&table_id.to_le_bytes()[..6]);
        p.extend_from_slice(&0u16.to_le_bytes()); // flags
        p.push(6);
        p.extend_from_slice(b"testdb");
        p.push(0);
        p.push(5);
        p.extend_from_slice(b"users");
        p.push(0);
        p.push(2); // column count
        p.push(3); // LONG
        p.push(15); // VARCHAR
        p.push(2); // metadata length
        p.extend_from_slice(&40u16.to_le_bytes()); // varchar max length
        p.push(0b11); // nullability bitmap
        p
    }

    /// One row image for the table above: (id, name).
    fn row(id: i32, name: &str) -> Vec<u8> {
        let mut p = Vec::new();
        p.push(0); // null bitmap: nothing null
        p.extend_from_slice(&id.to_le_bytes());
        p.push(name.len() as u8);
        p.extend_from_slice(name.as_bytes());
        p
    }

    fn rows_payload_v2(table_id: u64, update: bool, rows: &[Vec<u8>]) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&table_id.to_le_bytes()[..6]);
        p.extend_from_slice(&0u16.to_le_bytes()); // flags
        p.extend_from_slice(&2u16.to_le_bytes()); // extra data length
        p.push(2); // column count
        p.push(0b11); // included columns (before image)
        if update {
            p.push(0b11); // included columns (after image)
        }
        for r in rows {
            p.extend_from_slice(r);
        }
        p
    }

    fn decoder_with_table(table_id: u64) -> EventDecoder {
        let mut d = EventDecoder::new();
        d.set_log_file("mysql-bin.000001");
        let changes = d.decode(&event(19, &table_map_payload(table_id))).unwrap();
        assert!(changes.is_empty());
        d
    }

    #[test]
    fn test_header_parse() {
        let raw = event(30, &[]);
        let h = EventHeader::parse(&raw).unwrap();
        assert_eq!(h.event_type, EventType::WriteRowsV2);
        assert_eq!(h.server_id, 1);
        assert_eq!(h.next_position, 4096);
    }

    #[test]
    fn test_header_too_short() {
        assert!(EventHeader::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_table_map_registration() {
        let d = decoder_with_table(42);
        let entry = d.table_entry(42).unwrap();
        assert_eq!(entry.schema, "testdb");
        assert_eq!(entry.table, "users");
        assert_eq!(entry.column_count, 2);
        assert_eq!(entry.column_types[0], ColumnType::Long);
        assert_eq!(entry.column_types[1], ColumnType::Varchar);
        assert_eq!(entry.column_metadata[1], 40);
    }

    #[test]
    fn test_table_map_id_reassignment() {
        let mut d = decoder_with_table(42);

        // Same identifier, different table: the registry entry is replaced.
        let mut p = Vec::new();
        p.extend_from_slice(&42u64.to_le_bytes()[..6]);
        p.extend_from_slice(&0u16.to_le_bytes());
        p.push(6);
        p.extend_from_slice(b"testdb");
        p.push(0);
        p.push(6);
        p.extend_from_slice(b"orders");
        p.push(0);
        p.push(1);
        p.push(3);
        p.push(0); // no metadata
        p.push(0b1);
        d.decode(&event(19, &p)).unwrap();
        assert_eq!(d.table_entry(42).unwrap().table, "orders");
    }

    #[test]
    fn test_write_rows_one_insert_per_row() {
        let mut d = decoder_with_table(7);
        let payload = rows_payload_v2(7, false, &[row(1, "John"), row(2, "Jane")]);
        let changes = d.decode(&event(30, &payload)).unwrap();

        assert_eq!(changes.len(), 2);
        for (i, ev) in changes.iter().enumerate() {
            assert_eq!(ev.action, Action::Insert);
            assert_eq!(ev.database, "testdb");
            assert_eq!(ev.table, "users");
            assert_eq!(ev.log_file, "mysql-bin.000001");
            assert!(ev.before.is_empty());
            assert_eq!(ev.after.len(), 2);
            assert_eq!(
                ev.after["col_0"],
                ColumnValue::SignedInt([1, 2][i] as i64)
            );
        }
        assert_eq!(changes[0].after["col_1"], ColumnValue::Text("John".into()));
        assert_eq!(changes[1].after["col_1"], ColumnValue::Text("Jane".into()));
    }

    #[test]
    fn test_delete_rows_populates_before() {
        let mut d = decoder_with_table(7);
        let payload = rows_payload_v2(7, false, &[row(5, "Eve")]);
        let changes = d.decode(&event(32, &payload)).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, Action::Delete);
        assert!(changes[0].after.is_empty());
        assert_eq!(changes[0].before["col_0"], ColumnValue::SignedInt(5));
    }

    #[test]
    fn test_update_rows_pairing() {
        // 2k row images produce exactly k updates with before = image 2i
        // and after = image 2i+1.
        let mut d = decoder_with_table(7);
        let payload = rows_payload_v2(
            7,
            true,
            &[
                row(1, "old_a"),
                row(1, "new_a"),
                row(2, "old_b"),
                row(2, "new_b"),
            ],
        );
        let changes = d.decode(&event(31, &payload)).unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].action, Action::Update);
        assert_eq!(changes[0].before["col_1"], ColumnValue::Text("old_a".into()));
        assert_eq!(changes[0].after["col_1"], ColumnValue::Text("new_a".into()));
        assert_eq!(changes[1].before["col_1"], ColumnValue::Text("old_b".into()));
        assert_eq!(changes[1].after["col_1"], ColumnValue::Text("new_b".into()));
    }

    #[test]
    fn test_rows_without_table_map_is_decode_error() {
        let mut d = EventDecoder::new();
        let payload = rows_payload_v2(99, false, &[row(1, "x")]);
        let err = d.decode(&event(30, &payload)).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_null_values_and_bitmap_column_numbers() {
        // Three columns, only col_0 and col_2 included in the row image.
        let mut d = EventDecoder::new();
        let mut p = Vec::new();
        p.extend_from_slice(&9u64.to_le_bytes()[..6]);
        p.extend_from_slice(&0u16.to_le_bytes());
        p.push(2);
        p.extend_from_slice(b"db");
        p.push(0);
        p.push(1);
        p.extend_from_slice(b"t");
        p.push(0);
        p.push(3);
        p.extend_from_slice(&[3, 3, 3]); // three LONG columns
        p.push(0);
        p.push(0b111);
        d.decode(&event(19, &p)).unwrap();

        let mut payload = Vec::new();
        payload.extend_from_slice(&9u64.to_le_bytes()[..6]);
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&2u16.to_le_bytes());
        payload.push(3);
        payload.push(0b101); // include col_0 and col_2 only
        payload.push(0b10); // second included value (col_2) is NULL
        payload.extend_from_slice(&11i32.to_le_bytes());
        let changes = d.decode(&event(30, &payload)).unwrap();

        assert_eq!(changes.len(), 1);
        let after = &changes[0].after;
        assert_eq!(after.len(), 2);
        assert_eq!(after["col_0"], ColumnValue::SignedInt(11));
        assert_eq!(after["col_2"], ColumnValue::Null);
        assert!(!after.contains_key("col_1"));
    }

    #[test]
    fn test_query_event_action_extraction() {
        let mut d = EventDecoder::new();
        let sql = b"CREATE TABLE t (id INT)";
        let mut p = Vec::new();
        p.extend_from_slice(&10u32.to_le_bytes()); // thread id
        p.extend_from_slice(&0u32.to_le_bytes()); // exec time
        p.push(4); // schema length
        p.extend_from_slice(&0u16.to_le_bytes()); // error code
        p.extend_from_slice(&0u16.to_le_bytes()); // status vars length
        p.extend_from_slice(b"mydb");
        p.push(0);
        p.extend_from_slice(sql);

        let changes = d.decode(&event(2, &p)).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, Action::Create);
        assert_eq!(changes[0].database, "mydb");
        assert_eq!(changes[0].sql.as_deref(), Some("CREATE TABLE t (id INT)"));
        assert!(changes[0].before.is_empty() && changes[0].after.is_empty());
    }

    #[test]
    fn test_rotate_updates_log_file() {
        let mut d = EventDecoder::new();
        d.set_log_file("mysql-bin.000001");
        let mut p = Vec::new();
        p.extend_from_slice(&4u64.to_le_bytes());
        p.extend_from_slice(b"mysql-bin.000002");
        let changes = d.decode(&event(4, &p)).unwrap();
        assert!(changes.is_empty());
        assert_eq!(d.log_file(), "mysql-bin.000002");
    }

    #[test]
    fn test_xid_and_unknown_emit_nothing() {
        let mut d = EventDecoder::new();
        assert!(d.decode(&event(16, &8u64.to_le_bytes())).unwrap().is_empty());
        assert!(d.decode(&event(200, &[1, 2, 3])).unwrap().is_empty());
        assert!(d.decode(&event(27, &[])).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_event_is_decode_error() {
        let mut d = decoder_with_table(7);
        let mut payload = rows_payload_v2(7, false, &[row(1, "John")]);
        payload.truncate(payload.len() - 3);
        assert!(d.decode(&event(30, &payload)).is_err());
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(EventType::from_u8(30).name(), "WriteRowsV2");
        assert_eq!(EventType::from_u8(200).name(), "Unknown(200)");
        assert!(EventType::from_u8(31).is_rows_event());
        assert!(!EventType::from_u8(2).is_rows_event());
    }

    #[test]
    fn test_packed_uint() {
        let mut r = Reader::new(&[250]);
        assert_eq!(r.packed_uint().unwrap(), 250);
        let mut r = Reader::new(&[252, 0x34, 0x12]);
        assert_eq!(r.packed_uint().unwrap(), 0x1234);
        let mut r = Reader::new(&[251]);
        assert!(r.packed_uint().is_err());
    }

    #[test]
    fn test_bit_helpers() {
        assert_eq!(count_set_bits(&[0b1010_1010]), 4);
        assert_eq!(count_set_bits(&[]), 0);
        assert!(is_bit_set(&[0b0000_0100], 2));
        assert!(!is_bit_set(&[0b0000_0100], 3));
        assert!(is_bit_set(&[0x00, 0x01], 8));
        assert!(!is_bit_set(&[0x01], 9));
    }

    #[test]
    fn test_decimal_decoding() {
        // DECIMAL(4,2) value 12.34: int part 12 (1 byte), frac 34 (1 byte),
        // sign bit set for positive.
        let bytes = [0x80 | 12, 34];
        let mut r = Reader::new(&bytes);
        assert_eq!(decode_decimal(&mut r, 4, 2).unwrap(), "12.34");

        // Negative: complement of the positive encoding.
        let bytes = [!(0x80 | 12u8), !34u8];
        let mut r = Reader::new(&bytes);
        assert_eq!(decode_decimal(&mut r, 4, 2).unwrap(), "-12.34");
    }
}
