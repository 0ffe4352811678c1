use crate::archivist::snapshot::SnapshotMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub text: String,
    pub message_count: usize,
}

/// A message is new when it is newer than `since`. Without a recorded
/// watermark every message is new.
pub fn is_new(message: &SnapshotMessage, since: Option<i64>) -> bool {
    match since {
        None => true,
        Some(mark) => message.timestamp_ms.is_some_and(|ts| ts > mark),
    }
}

pub fn new_messages(messages: &[SnapshotMessage], since: Option<i64>) -> Vec<&SnapshotMessage> {
    messages.iter().filter(|m| is_new(m, since)).collect()
}

pub fn newest_timestamp(messages: &[SnapshotMessage]) -> Option<i64> {
    messages.iter().filter_map(|m| m.timestamp_ms).max()
}

fn render_pair(message: &SnapshotMessage) -> String {
    format!("User: {}\nAI: {}\n\n", message.user, message.ai)
}

/// Greedy packing in order. A pair that alone exceeds `max_chars` still gets
/// its own block.
pub fn chunk(messages: &[&SnapshotMessage], max_chars: usize, max_count: usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut text = String::new();
    let mut chars = 0usize;
    let mut count = 0usize;

    for message in messages {
        let entry = render_pair(message);
        let entry_chars = entry.chars().count();
        if count > 0 && (chars + entry_chars > max_chars || count >= max_count) {
            blocks.push(Block {
                text: std::mem::take(&mut text),
                message_count: count,
            });
            chars = 0;
            count = 0;
        }
        text.push_str(&entry);
        chars += entry_chars;
        count += 1;
    }
    if count > 0 {
        blocks.push(Block {
            text,
            message_count: count,
        });
    }
    blocks
}
