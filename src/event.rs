use crate::api::{HistoryMessage, UploadResponse};
use crate::channel::ChannelEvent;

/// Progress/outcome of one upload attempt. The generation ties events to
/// the attempt they belong to so a cancelled upload cannot mutate state.
#[derive(Debug)]
pub enum UploadEvent {
    Progress(u8),
    Finished(Result<UploadResponse, String>),
}

/// Everything the background tasks report into the UI loop. Delivered
/// over one mpsc channel, so state mutations stay serialized.
#[derive(Debug)]
pub enum ClientEvent {
    Upload { generation: u64, event: UploadEvent },
    History {
        pdf_id: String,
        result: Result<Vec<HistoryMessage>, String>,
    },
    Channel { generation: u64, event: ChannelEvent },
}
