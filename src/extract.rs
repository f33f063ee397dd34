//! Record extraction: raw provider rows to candidate records.
//!
//! One call to [`RecordExtractor::extract`] reads one page of one channel
//! and maps every row to a [`CandidateRecord`]:
//!
//! - **SMS**: one row, one record with its text body and address.
//! - **MMS**: the header row plus its part and address sub-queries. Text
//!   parts become the body, role codes map to [`AddressRole`]s and an
//!   `application/smil` part drives the render order. Attachment payloads
//!   are externalized through [`MessageStore::put_blob`] only after every
//!   row of the page has decoded, so a discarded page leaves no blobs.
//! - **RCS**: multipart header rows whose declared content type contains one
//!   of the configured markers, plus (through
//!   [`RecordExtractor::extract_secondary`]) rows of the secondary chat
//!   provider when its capability is available.
//!
//! Extraction never fails upward. Any source or blob error is logged and the
//! page comes back empty, which the orchestrator treats as end of backlog.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use relay_core::models::{
    essence, is_attachment_mime, Address, AddressRole, CandidateRecord, Channel, Message, Part,
    PartKind, TransferMetadata, MIME_SMIL,
};
use relay_core::smil;
use relay_core::store::MessageStore;

use crate::capability::CapabilityCache;
use crate::source::rows::{AddrRow, ImRow, MmsRow, PartRow, SmsRow};
use crate::source::{MessageSource, SourceRow, SourceTable};

/// Multipart and chat timestamps below this are seconds, not milliseconds.
pub const SECONDS_THRESHOLD: i64 = 10_000_000_000;

/// Body of a multipart message whose only content is an image.
pub const PICTURE_BODY: &str = "[Picture]";

/// Seconds-since-epoch values are scaled to milliseconds.
pub fn normalize_timestamp(value: i64) -> i64 {
    if value < SECONDS_THRESHOLD {
        value.saturating_mul(1000)
    } else {
        value
    }
}

/// Result of reading one page.
#[derive(Debug, Default)]
pub struct ExtractedPage {
    pub records: Vec<CandidateRecord>,
    /// Source rows read, including rows that produced no record.
    pub rows_scanned: usize,
    /// Highest row id read; the exclusive lower bound of the next page.
    pub last_position: Option<i64>,
}

impl ExtractedPage {
    fn empty() -> Self {
        Self::default()
    }

    fn scanned(rows: &[SourceRow]) -> Self {
        Self {
            records: Vec::new(),
            rows_scanned: rows.len(),
            last_position: rows.iter().filter_map(|r| r.long("_id")).max(),
        }
    }
}

/// Attachment payload read while decoding, written once the page is complete.
struct PendingBlob {
    record: usize,
    part: usize,
    key: String,
    bytes: Vec<u8>,
}

pub struct RecordExtractor {
    source: Arc<dyn MessageSource>,
    store: Arc<dyn MessageStore>,
    markers: Vec<String>,
    secondary: Option<Arc<CapabilityCache>>,
}

impl RecordExtractor {
    pub fn new(
        source: Arc<dyn MessageSource>,
        store: Arc<dyn MessageStore>,
        markers: Vec<String>,
    ) -> Self {
        Self {
            source,
            store,
            markers,
            secondary: None,
        }
    }

    /// Enable the secondary chat provider, gated by `capability`.
    pub fn with_secondary(mut self, capability: Arc<CapabilityCache>) -> Self {
        self.secondary = Some(capability);
        self
    }

    /// Whether the secondary provider should be scanned this run. Probes the
    /// capability on first use.
    pub async fn secondary_available(&self) -> bool {
        match &self.secondary {
            Some(capability) => capability.probe(self.source.as_ref()).await,
            None => false,
        }
    }

    /// Read one page of `channel` rows with row id greater than `after`.
    pub async fn extract(
        &self,
        channel: Channel,
        after: Option<i64>,
        page_size: usize,
    ) -> ExtractedPage {
        let result = match channel {
            Channel::Sms => self.extract_sms(after, page_size).await,
            Channel::Mms => self.extract_mms(after, page_size).await,
            Channel::Rcs => self.extract_rcs(after, page_size).await,
        };
        match result {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    channel = %channel,
                    after = ?after,
                    error = %format!("{:#}", e),
                    "source read failed; treating page as empty"
                );
                ExtractedPage::empty()
            }
        }
    }

    /// Read one page of the secondary chat provider. A read failure disables
    /// the provider until its capability is reset.
    pub async fn extract_secondary(&self, after: Option<i64>, page_size: usize) -> ExtractedPage {
        let Some(capability) = &self.secondary else {
            return ExtractedPage::empty();
        };
        let rows = match self.source.query(SourceTable::ImChat, after, page_size).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "secondary provider read failed");
                capability.mark_unavailable().await;
                return ExtractedPage::empty();
            }
        };

        let mut page = ExtractedPage::scanned(&rows);
        for row in &rows {
            let Some(im) = ImRow::decode(row) else {
                continue;
            };
            if let Some(record) = im_record(&im, row) {
                page.records.push(record);
            }
        }
        page
    }

    async fn extract_sms(&self, after: Option<i64>, page_size: usize) -> Result<ExtractedPage> {
        let rows = self
            .source
            .query(SourceTable::Sms, after, page_size)
            .await
            .context("sms query")?;

        let mut page = ExtractedPage::scanned(&rows);
        for row in &rows {
            match SmsRow::decode(row) {
                Some(sms) => page.records.push(sms_record(&sms, row)),
                None => debug!("skipping sms row without _id"),
            }
        }
        Ok(page)
    }

    async fn extract_mms(&self, after: Option<i64>, page_size: usize) -> Result<ExtractedPage> {
        let rows = self
            .source
            .query(SourceTable::Mms, after, page_size)
            .await
            .context("mms query")?;

        let mut page = ExtractedPage::scanned(&rows);
        let mut pending = Vec::new();
        for row in &rows {
            let Some(mms) = MmsRow::decode(row) else {
                debug!("skipping mms row without _id");
                continue;
            };
            let index = page.records.len();
            let record = self.mms_record(&mms, row, index, &mut pending).await?;
            page.records.push(record);
        }
        self.store_payloads(&mut page.records, pending).await?;
        Ok(page)
    }

    async fn store_payloads(
        &self,
        records: &mut [CandidateRecord],
        pending: Vec<PendingBlob>,
    ) -> Result<()> {
        for blob in pending {
            let path = self
                .store
                .put_blob(&blob.key, &blob.bytes)
                .await
                .with_context(|| format!("storing payload {}", blob.key))?;
            if let Some(part) = records
                .get_mut(blob.record)
                .and_then(|r| r.parts.get_mut(blob.part))
            {
                part.stored_path = Some(path);
            }
        }
        Ok(())
    }

    async fn extract_rcs(&self, after: Option<i64>, page_size: usize) -> Result<ExtractedPage> {
        let rows = self
            .source
            .query(SourceTable::Mms, after, page_size)
            .await
            .context("rcs heuristic query")?;

        let mut page = ExtractedPage::scanned(&rows);
        for row in &rows {
            let Some(mms) = MmsRow::decode(row) else {
                continue;
            };
            if mms.matches_any(&self.markers) {
                page.records.push(rcs_record(&mms, row));
            }
        }
        Ok(page)
    }

    async fn mms_record(
        &self,
        mms: &MmsRow,
        row: &SourceRow,
        record: usize,
        pending: &mut Vec<PendingBlob>,
    ) -> Result<CandidateRecord> {
        let part_rows = self
            .source
            .parts_for(mms.id)
            .await
            .with_context(|| format!("parts of mms {}", mms.id))?;
        let addr_rows = self
            .source
            .addresses_for(mms.id)
            .await
            .with_context(|| format!("addresses of mms {}", mms.id))?;

        let addresses: Vec<Address> = addr_rows
            .iter()
            .filter_map(AddrRow::decode)
            .filter_map(|a| {
                let role = a.role?;
                Some(Address {
                    message_id: String::new(),
                    address: a.address,
                    role,
                    charset: a.charset,
                })
            })
            .collect();

        let mut parts = Vec::with_capacity(part_rows.len());
        for part_row in part_rows.iter().filter_map(PartRow::decode) {
            let (part, payload) = self.build_part(&part_row).await?;
            if let Some((key, bytes)) = payload {
                pending.push(PendingBlob {
                    record,
                    part: parts.len(),
                    key,
                    bytes,
                });
            }
            parts.push(part);
        }

        let from = addresses
            .iter()
            .find(|a| a.role == AddressRole::From)
            .map(|a| a.address.clone())
            .unwrap_or_else(|| Channel::Mms.placeholder_address(mms.id));

        let mut message = Message::new(
            Channel::Mms,
            from,
            normalize_timestamp(mms.date.unwrap_or(0)),
        );
        message.source_position = Some(mms.id);
        message.conversation_id = mms.thread_id;
        message.body = multipart_body(&parts, mms.subject.as_deref());
        message.date_sent = mms.date_sent.map(normalize_timestamp);
        message.read = mms.read;
        message.msg_box = mms.msg_box;
        message.status = mms.status;
        message.seen = mms.seen;
        message.locked = mms.locked;
        message.subject = mms.subject.clone();
        message.content_type = mms.content_type.clone();
        message.render_order = render_order(&parts);
        message.raw_json = Some(row.to_json());

        Ok(CandidateRecord {
            message,
            parts,
            addresses,
        })
    }

    /// Decode one part row. Attachments come back with their blob key and
    /// payload instead of a stored path.
    async fn build_part(&self, row: &PartRow) -> Result<(Part, Option<(String, Vec<u8>)>)> {
        let content_type = row.content_type.as_deref();
        let is_attachment = is_attachment_mime(content_type);
        let mut part = Part {
            part_id: row.id.to_string(),
            message_id: String::new(),
            seq: row.seq,
            content_type: row.content_type.clone(),
            kind: PartKind::from_mime(content_type),
            is_attachment,
            text: None,
            stored_path: None,
            name: row.name.clone(),
            filename: row.filename.clone(),
            charset: row.charset.clone(),
            content_id: row.content_id.clone(),
            content_location: row.content_location.clone(),
            transfer: TransferMetadata {
                size: row.ctt_s.clone(),
                transfer_type: row.ctt_t.clone(),
                disposition: row.disposition.clone(),
            },
        };

        if is_attachment {
            let bytes = self
                .source
                .open_part(row.id)
                .await
                .with_context(|| format!("payload of part {}", row.id))?;
            if bytes.is_none() {
                debug!(part_id = row.id, "attachment has no payload; storing empty blob");
            }
            let key = format!("mms/part-{}{}", row.id, blob_extension(&part));
            return Ok((part, Some((key, bytes.unwrap_or_default()))));
        }
        part.text = Some(row.text.clone().unwrap_or_default());
        Ok((part, None))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn sms_record(sms: &SmsRow, row: &SourceRow) -> CandidateRecord {
    let address = non_blank(sms.address.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| Channel::Sms.placeholder_address(sms.id));

    let mut message = Message::new(Channel::Sms, address, sms.date.unwrap_or(0));
    message.source_position = Some(sms.id);
    message.conversation_id = sms.thread_id;
    message.body = sms.body.clone();
    message.date_sent = sms.date_sent;
    message.read = sms.read;
    message.msg_box = sms.msg_type;
    message.status = sms.status;
    message.service_center = sms.service_center.clone();
    message.protocol = sms.protocol;
    message.seen = sms.seen;
    message.locked = sms.locked;
    message.error_code = sms.error_code;
    message.subject = sms.subject.clone();
    message.raw_json = Some(row.to_json());
    CandidateRecord::new(message)
}

fn rcs_record(mms: &MmsRow, row: &SourceRow) -> CandidateRecord {
    let body = match non_blank(mms.subject.as_deref()) {
        Some(subject) => subject.to_string(),
        None => format!(
            "RCS candidate ({})",
            mms.content_type.as_deref().unwrap_or_default()
        ),
    };

    let mut message = Message::new(
        Channel::Rcs,
        Channel::Rcs.placeholder_address(mms.id),
        normalize_timestamp(mms.date.unwrap_or(0)),
    );
    message.source_position = Some(mms.id);
    message.conversation_id = mms.thread_id;
    message.body = Some(body);
    message.date_sent = mms.date_sent.map(normalize_timestamp);
    message.read = mms.read;
    message.msg_box = mms.msg_box;
    message.subject = mms.subject.clone();
    message.content_type = mms.content_type.clone();
    message.raw_json = Some(row.to_json());
    CandidateRecord::new(message)
}

fn im_record(im: &ImRow, row: &SourceRow) -> Option<CandidateRecord> {
    let body = non_blank(im.body.as_deref())?;
    let address = non_blank(im.address.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| Channel::Rcs.placeholder_address(im.id));

    let mut message = Message::new(
        Channel::Rcs,
        address,
        normalize_timestamp(im.date.unwrap_or(0)),
    );
    // Chat row ids live in their own space and never feed the watermark.
    message.source_position = None;
    message.conversation_id = im.thread_id;
    message.body = Some(body.to_string());
    message.raw_json = Some(row.to_json());
    Some(CandidateRecord::new(message))
}

/// Text parts joined by newlines; `[Picture]` for image-only messages;
/// otherwise the subject.
fn multipart_body(parts: &[Part], subject: Option<&str>) -> Option<String> {
    let text = parts
        .iter()
        .filter(|p| p.kind == PartKind::Text && !p.is_attachment)
        .filter_map(|p| non_blank(p.text.as_deref()))
        .collect::<Vec<_>>()
        .join("\n");
    if !text.is_empty() {
        return Some(text);
    }
    if parts.iter().any(Part::is_image) {
        return Some(PICTURE_BODY.to_string());
    }
    non_blank(subject).map(str::to_string)
}

fn render_order(parts: &[Part]) -> Vec<String> {
    let markup = parts.iter().find_map(|p| {
        let is_smil = p
            .content_type
            .as_deref()
            .is_some_and(|ct| essence(ct) == MIME_SMIL);
        if is_smil {
            non_blank(p.text.as_deref())
        } else {
            None
        }
    });
    match markup {
        Some(markup) => smil::to_render_order(&smil::parse(markup), parts),
        None => Vec::new(),
    }
}

/// File extension for an externalized payload: from the part's filename,
/// else from its MIME type.
fn blob_extension(part: &Part) -> String {
    if let Some(ext) = part
        .best_filename()
        .and_then(|f| std::path::Path::new(f).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
    {
        return format!(".{}", ext.to_ascii_lowercase());
    }
    let mime = part.content_type.as_deref().map(essence).unwrap_or_default();
    let ext = match mime.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/3gpp" => "3gp",
        "audio/amr" => "amr",
        "audio/mpeg" => "mp3",
        "text/x-vcard" | "text/vcard" => "vcf",
        _ => "bin",
    };
    format!(".{}", ext)
}
