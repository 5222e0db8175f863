use std::fmt;
use thiserror::Error;

/// Builds a [`BlockError`] carrying a formatted `Malformed` message.
macro_rules! err {
    (($($msg:tt)*), ($($ctx:tt)*)) => {
        $crate::error::BlockError::malformed(format!($($msg)*)).with_context(format!($($ctx)*))
    };
    ($($msg:tt)*) => {
        $crate::error::BlockError::malformed(format!($($msg)*))
    };
}

/// Returns early with a `Malformed` [`BlockError`], optionally adding one context entry.
#[macro_export]
macro_rules! fail {
    (($($msg:tt)*), ($($ctx:tt)*)) => {
        return Err($crate::error::BlockError::malformed(format!($($msg)*)).with_context(format!($($ctx)*)))
    };
    ($($msg:tt)*) => {
        return Err($crate::error::BlockError::malformed(format!($($msg)*)))
    };
}

/// The failure classes of the container engine.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A chunk header names a null or unregistered type where a known chunk is required.
    #[error("invalid chunk type 0x{type_tag:04x} at offset {offset}")]
    InvalidChunk { type_tag: u16, offset: usize },

    /// A declared length runs past the bytes that are available.
    #[error("truncated input: {needed} bytes needed at offset {offset}, {available} available")]
    TruncatedInput { offset: usize, needed: usize, available: usize },

    /// An id section has no free 16-bit index slots left for an incoming record set.
    #[error("section {section} is full: {count} present, {requested} requested, capacity {capacity}")]
    SectionFull { section: &'static str, count: usize, requested: usize, capacity: usize },

    /// A full refresh never produced a stable checksum.
    #[error("layout did not reach a fixed point after {trials} refresh trials")]
    RefreshDivergence { trials: usize },

    #[error("{0}")]
    Malformed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct BlockError
{
    kind: ErrorKind,
    contexts: Vec<String>,
}

pub type Result<T> = std::result::Result<T, BlockError>;

impl BlockError
{
    pub fn new(kind: ErrorKind) -> Self
    {
        BlockError { kind, contexts: Vec::new() }
    }

    pub fn malformed(msg: impl Into<String>) -> Self
    {
        BlockError::new(ErrorKind::Malformed(msg.into()))
    }

    pub(crate) fn truncated(offset: usize, needed: usize, available: usize) -> Self
    {
        BlockError::new(ErrorKind::TruncatedInput { offset, needed, available })
    }

    pub(crate) fn invalid_chunk(type_tag: u16, offset: usize) -> Self
    {
        BlockError::new(ErrorKind::InvalidChunk { type_tag, offset })
    }

    /// Appends a description of the enclosing node, innermost first.
    pub fn with_context(mut self, context: impl Into<String>) -> Self
    {
        self.contexts.push(context.into());
        self
    }

    pub fn kind(&self) -> &ErrorKind
    {
        &self.kind
    }

    pub fn contexts(&self) -> &[String]
    {
        &self.contexts
    }
}

impl From<ErrorKind> for BlockError
{
    fn from(kind: ErrorKind) -> Self
    {
        BlockError::new(kind)
    }
}

impl From<std::io::Error> for BlockError
{
    fn from(err: std::io::Error) -> Self
    {
        BlockError::new(ErrorKind::Io(err))
    }
}

impl fmt::Display for BlockError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.kind)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for BlockError
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)>
    {
        Some(&self.kind)
    }
}
