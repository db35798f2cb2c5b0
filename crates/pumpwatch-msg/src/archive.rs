//! ---
//! pw_section: "03-persistence-logging"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Append-only JSONL archive of everything published on the bus."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::transport::Transport;
use crate::types::{Message, TopicKind};
use crate::Result;

const ARCHIVE_VERSION: u16 = 1;

/// First line of every archive file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveHeader {
    archive_version: u16,
    created_at: DateTime<Utc>,
    topic_kind: String,
}

/// One archived message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Sequence number within the file, starting at 1.
    pub seq: u64,
    /// Full topic, e.g. `telemetry/pump01`.
    pub topic: String,
    /// Wall-clock time the record was written.
    pub recorded_at: DateTime<Utc>,
    /// Wire payload.
    pub payload: serde_json::Value,
}

struct JsonlFile {
    writer: BufWriter<File>,
    next_seq: u64,
}

impl JsonlFile {
    fn open(path: &Path, kind: TopicKind) -> Result<Self> {
        let fresh = !path.exists() || fs::metadata(path)?.len() == 0;
        let next_seq = if fresh { 0 } else { last_sequence(path)? };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if fresh {
            let header = ArchiveHeader {
                archive_version: ARCHIVE_VERSION,
                created_at: Utc::now(),
                topic_kind: kind.to_string(),
            };
            serde_json::to_writer(&mut writer, &header)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(Self { writer, next_seq })
    }

    fn append(&mut self, topic: String, payload: serde_json::Value) -> Result<u64> {
        self.next_seq += 1;
        let record = ArchiveRecord {
            seq: self.next_seq,
            topic,
            recorded_at: Utc::now(),
            payload,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(record.seq)
    }
}

/// Transport that appends messages to `telemetry.jsonl`, `alerts.jsonl`
/// and `control.jsonl` under one directory.
///
/// This is the local fallback record when other transports fail.
pub struct JsonlArchive {
    directory: PathBuf,
    telemetry: Mutex<JsonlFile>,
    alerts: Mutex<JsonlFile>,
    control: Mutex<JsonlFile>,
}

impl JsonlArchive {
    /// Open (or continue) the archive files in `directory`.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        let open = |kind: TopicKind| -> Result<Mutex<JsonlFile>> {
            let path = directory.join(file_name(kind));
            Ok(Mutex::new(JsonlFile::open(&path, kind)?))
        };
        Ok(Self {
            telemetry: open(TopicKind::Telemetry)?,
            alerts: open(TopicKind::Alerts)?,
            control: open(TopicKind::Control)?,
            directory,
        })
    }

    /// Path of the file holding `kind` messages.
    pub fn path_for(&self, kind: TopicKind) -> PathBuf {
        self.directory.join(file_name(kind))
    }

    fn file(&self, kind: TopicKind) -> &Mutex<JsonlFile> {
        match kind {
            TopicKind::Telemetry => &self.telemetry,
            TopicKind::Alerts => &self.alerts,
            TopicKind::Control => &self.control,
        }
    }
}

impl Transport for JsonlArchive {
    fn send(&self, msg: &Message) -> Result<()> {
        let payload = msg.payload_json()?;
        self.file(msg.kind())
            .lock()
            .append(msg.topic.to_string(), payload)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl_archive"
    }
}

fn file_name(kind: TopicKind) -> &'static str {
    match kind {
        TopicKind::Telemetry => "telemetry.jsonl",
        TopicKind::Alerts => "alerts.jsonl",
        TopicKind::Control => "control.jsonl",
    }
}

fn last_sequence(path: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut last = 0;
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<ArchiveRecord>(&line) {
            last = record.seq;
        }
    }
    Ok(last)
}

/// Read every record of an archive file in order, skipping the header.
pub fn read_archive(path: &Path) -> Result<Vec<ArchiveRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ControlAction, ControlEvent};

    fn reset(asset: &str) -> Message {
        Message::control(ControlEvent {
            ts: Utc::now(),
            asset_id: asset.into(),
            action: ControlAction::Reset,
            scenario: Some("demo".into()),
        })
    }

    #[test]
    fn appends_records_under_topic_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = JsonlArchive::open(dir.path())?;
        archive.send(&reset("pump01"))?;
        archive.send(&reset("pump02"))?;

        let records = read_archive(&archive.path_for(TopicKind::Control))?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 1);
        assert_eq!(records[1].topic, "control/pump02");
        assert_eq!(records[1].payload["action"], "reset");
        assert!(read_archive(&archive.path_for(TopicKind::Telemetry))?.is_empty());
        Ok(())
    }

    #[test]
    fn reopening_continues_sequence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let archive = JsonlArchive::open(dir.path())?;
            archive.send(&reset("pump01"))?;
        }
        let archive = JsonlArchive::open(dir.path())?;
        archive.send(&reset("pump01"))?;
        let records = read_archive(&archive.path_for(TopicKind::Control))?;
        assert_eq!(
            records.iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![1, 2]
        );
        Ok(())
    }
}
