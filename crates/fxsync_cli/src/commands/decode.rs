//! Decode command implementation.

use super::{parse_hex, parse_stream_type};
use fxsync_codec::{
    decode_stream, AttachmentContent, FolderChild, FolderContent, Message, MessageChild,
    MessageContent, PropertyList, StreamObject, StreamType, SyncState,
};
use fxsync_core::IdSet;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Counts of what a decoded stream holds.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    /// Stream type name.
    pub kind: String,
    /// Encoded size in bytes.
    pub bytes: usize,
    /// Folders, including the top folder.
    pub folders: usize,
    /// Messages, including associated ones.
    pub messages: usize,
    /// Folder-associated messages.
    pub fai_messages: usize,
    /// Recipient rows.
    pub recipients: usize,
    /// Attachments, including nested ones.
    pub attachments: usize,
    /// Property values across every element.
    pub properties: usize,
    /// Change entries of a synchronization stream.
    pub changes: usize,
    /// Display names of folders, in stream order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub folder_names: Vec<String>,
    /// Checkpoint sets and how many counters each holds.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub state: Vec<StateSet>,
}

/// One checkpoint set of a state.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct StateSet {
    /// Property name.
    pub name: &'static str,
    /// Number of counters in the set.
    pub counters: u64,
}

/// Runs the decode command.
pub fn run(
    path: &Path,
    kind: &str,
    hex: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind = parse_stream_type(kind)?;
    let bytes = load(path, hex)?;
    let summary = summarize(&bytes, kind)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            print_text_output(&summary);
        }
    }

    Ok(())
}

/// Reads a stream file, decoding hex text if asked to.
pub fn load(path: &Path, hex: bool) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No stream file at {:?}", path).into());
    }
    if hex {
        parse_hex(&std::fs::read_to_string(path)?)
    } else {
        Ok(std::fs::read(path)?)
    }
}

/// Decodes `bytes` as `kind` and counts what it holds.
pub fn summarize(
    bytes: &[u8],
    kind: StreamType,
) -> Result<StreamSummary, Box<dyn std::error::Error>> {
    let object = decode_stream(bytes, kind)?;
    debug!(kind = kind.name(), bytes = bytes.len(), "decoded stream");

    let mut summary = StreamSummary {
        kind: kind.name().to_string(),
        bytes: bytes.len(),
        ..StreamSummary::default()
    };
    match &object {
        StreamObject::TopFolder(folder) | StreamObject::FolderContent(folder) => {
            summary.folder(folder);
        }
        StreamObject::MessageContent(content) => summary.content(content),
        StreamObject::AttachmentContent(attachment) => summary.attachment(attachment),
        StreamObject::MessageList(list) => {
            for message in list.messages() {
                summary.message(message);
            }
        }
        StreamObject::ContentsSync(sync) => {
            summary.changes = sync.changes.len();
            for change in &sync.changes {
                summary.messages += 1;
                if change.is_fai() {
                    summary.fai_messages += 1;
                }
                summary.list(&change.header);
                summary.content(&change.content);
            }
            summary.state(&sync.state);
        }
        StreamObject::HierarchySync(sync) => {
            summary.changes = sync.folders.len();
            for folder in &sync.folders {
                summary.folders += 1;
                summary.list(folder);
            }
            summary.state(&sync.state);
        }
        StreamObject::SyncState(state) => summary.state(state),
    }
    Ok(summary)
}

impl StreamSummary {
    fn list(&mut self, list: &PropertyList) {
        self.properties += list.len();
    }

    fn folder(&mut self, folder: &FolderContent) {
        self.folders += 1;
        self.list(&folder.properties);
        if let Some(name) = folder.display_name() {
            self.folder_names.push(name.to_string());
        }
        for child in &folder.children {
            match child {
                FolderChild::Folder(subfolder) => self.folder(subfolder),
                FolderChild::Message(message) => self.message(message),
                FolderChild::Meta(_) => {}
            }
        }
    }

    fn message(&mut self, message: &Message) {
        self.messages += 1;
        if message.fai {
            self.fai_messages += 1;
        }
        self.content(&message.content);
    }

    fn content(&mut self, content: &MessageContent) {
        self.list(&content.properties);
        for child in &content.children {
            match child {
                MessageChild::Recipient(row) => {
                    self.recipients += 1;
                    self.list(row);
                }
                MessageChild::Attachment(attachment) => self.attachment(attachment),
                MessageChild::Meta(_) => {}
            }
        }
    }

    fn attachment(&mut self, attachment: &AttachmentContent) {
        self.attachments += 1;
        self.list(&attachment.properties);
        if let Some(embedded) = &attachment.embedded {
            self.content(embedded);
        }
    }

    fn state(&mut self, state: &SyncState) {
        let sets: [(&'static str, Option<&IdSet>); 4] = [
            ("idset-given", state.idset_given.as_ref()),
            ("cnset-seen", state.cnset_seen.as_ref()),
            ("cnset-seen-fai", state.cnset_seen_fai.as_ref()),
            ("cnset-read", state.cnset_read.as_ref()),
        ];
        for (name, set) in sets {
            let Some(set) = set else { continue };
            self.state.push(StateSet {
                name,
                counters: set.counter_count(),
            });
        }
        self.properties += state.other.len();
    }
}

fn print_text_output(summary: &StreamSummary) {
    println!("FastTransfer Stream");
    println!("===================");
    println!();
    println!("Type:  {}", summary.kind);
    println!("Size:  {} bytes", summary.bytes);
    println!();
    println!("Contents:");
    println!("  Folders:      {}", summary.folders);
    println!("  Messages:     {} ({} associated)", summary.messages, summary.fai_messages);
    println!("  Recipients:   {}", summary.recipients);
    println!("  Attachments:  {}", summary.attachments);
    println!("  Properties:   {}", summary.properties);
    if summary.changes > 0 {
        println!("  Changes:      {}", summary.changes);
    }

    if !summary.folder_names.is_empty() {
        println!();
        println!("Folders:");
        for name in &summary.folder_names {
            println!("  {}", name);
        }
    }

    if !summary.state.is_empty() {
        println!();
        println!("State:");
        for set in &summary.state {
            println!("  {:<15} {} counters", set.name, set.counters);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxsync_codec::{encode_stream, pid, ContentsSync, PropValue};
    use fxsync_core::{GlobalCounter, ReplicaId};
    use std::io::Write;

    fn inbox_tree() -> Vec<u8> {
        let mut top = FolderContent::new(
            PropertyList::new().with(pid::DISPLAY_NAME, PropValue::String("Root".into())),
        );
        let mut message = MessageContent::new(
            PropertyList::new().with(pid::SUBJECT, PropValue::String("hello".into())),
        );
        message.children.push(MessageChild::Recipient(PropertyList::new()));
        top.children.push(FolderChild::Folder(FolderContent::new(
            PropertyList::new().with(pid::DISPLAY_NAME, PropValue::String("Inbox".into())),
        )));
        top.children.push(FolderChild::Message(Message {
            fai: true,
            content: message,
        }));
        encode_stream(&StreamObject::TopFolder(top)).unwrap()
    }

    #[test]
    fn summarizes_top_folder() {
        let summary = summarize(&inbox_tree(), StreamType::TopFolder).unwrap();
        assert_eq!(summary.folders, 2);
        assert_eq!(summary.messages, 1);
        assert_eq!(summary.fai_messages, 1);
        assert_eq!(summary.recipients, 1);
        assert_eq!(summary.folder_names, vec!["Root", "Inbox"]);
    }

    #[test]
    fn summarizes_state_sets() {
        let mut seen = IdSet::new();
        seen.insert_range(
            ReplicaId::from_bytes([3; 16]),
            GlobalCounter::new(1).unwrap(),
            GlobalCounter::new(10).unwrap(),
        )
        .unwrap();
        let sync = ContentsSync {
            state: SyncState {
                cnset_seen: Some(seen),
                ..SyncState::default()
            },
            ..ContentsSync::default()
        };
        let bytes = encode_stream(&StreamObject::ContentsSync(sync)).unwrap();
        let summary = summarize(&bytes, StreamType::ContentsSync).unwrap();
        assert_eq!(
            summary.state,
            vec![StateSet {
                name: "cnset-seen",
                counters: 10
            }]
        );
    }

    #[test]
    fn loads_raw_and_hex_files() {
        let bytes = inbox_tree();
        let mut raw = tempfile::NamedTempFile::new().unwrap();
        raw.write_all(&bytes).unwrap();
        assert_eq!(load(raw.path(), false).unwrap(), bytes);

        let text: String = bytes.iter().map(|b| format!("{:02x} ", b)).collect();
        let mut hex = tempfile::NamedTempFile::new().unwrap();
        hex.write_all(text.as_bytes()).unwrap();
        assert_eq!(load(hex.path(), true).unwrap(), bytes);
    }

    #[test]
    fn wrong_kind_is_an_error() {
        assert!(summarize(&inbox_tree(), StreamType::State).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.bin"), false).is_err());
    }
}
