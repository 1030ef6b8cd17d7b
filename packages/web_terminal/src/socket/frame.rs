use axum::extract::ws::{CloseFrame, Message, close_code};

/// Transport-neutral WebSocket frame.
///
/// The socket layer speaks only `Frame`s; the axum adapter converts at the
/// edge so everything above it can be driven by plain channels in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseReason>),
}

/// Close code plus reason text sent with a close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: close_code::NORMAL,
            reason: reason.into(),
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame::Binary(data)
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::Text(text.as_str().to_string()),
            Message::Binary(data) => Frame::Binary(data.to_vec()),
            Message::Ping(data) => Frame::Ping(data.to_vec()),
            Message::Pong(data) => Frame::Pong(data.to_vec()),
            Message::Close(frame) => Frame::Close(frame.map(|f| CloseReason {
                code: f.code,
                reason: f.reason.as_str().to_string(),
            })),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: r.code,
                reason: r.reason.into(),
            })),
        }
    }
}
