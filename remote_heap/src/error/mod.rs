use crate::engine::BlockId;
use thiserror::Error;

/// Error category for decision-making (retry, abort, reconnect, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error - may resolve once the collector has run
    Transient,
    /// Fatal error - should abort operation
    Fatal,
    /// Validation error - invalid user input
    Validation,
    /// Connection lost - should reconnect
    ConnectionLost,
}

/// Numeric error codes carried on the wire inside a [`StructuredError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Connection = 1,
    NotConnected = 2,
    Allocation = 3,
    Bounds = 4,
    InvalidHandle = 5,
    Protocol = 6,
    SizeMismatch = 7,
    NullHandle = 8,
    RefCountUnderflow = 9,
    Internal = 10,
}

impl ErrorCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Connection),
            2 => Some(Self::NotConnected),
            3 => Some(Self::Allocation),
            4 => Some(Self::Bounds),
            5 => Some(Self::InvalidHandle),
            6 => Some(Self::Protocol),
            7 => Some(Self::SizeMismatch),
            8 => Some(Self::NullHandle),
            9 => Some(Self::RefCountUnderflow),
            10 => Some(Self::Internal),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeapError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not connected to memory manager")]
    NotConnected,

    #[error("Allocation failed: no free region of {size} bytes")]
    Allocation { size: usize },

    #[error("Bounds error: {0}")]
    Bounds(String),

    #[error("Invalid handle ID: {0}")]
    InvalidHandle(BlockId),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Null handle cannot be {0}")]
    NullHandle(&'static str),

    #[error("Reference count of block {0} is already at or below zero")]
    RefCountUnderflow(BlockId),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl HeapError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HeapError::Connection(_) => ErrorCode::Connection,
            HeapError::NotConnected => ErrorCode::NotConnected,
            HeapError::Allocation { .. } => ErrorCode::Allocation,
            HeapError::Bounds(_) => ErrorCode::Bounds,
            HeapError::InvalidHandle(_) => ErrorCode::InvalidHandle,
            HeapError::Protocol(_) => ErrorCode::Protocol,
            HeapError::SizeMismatch { .. } => ErrorCode::SizeMismatch,
            HeapError::NullHandle(_) => ErrorCode::NullHandle,
            HeapError::RefCountUnderflow(_) => ErrorCode::RefCountUnderflow,
            HeapError::InternalError(_) => ErrorCode::Internal,
        }
    }

    /// The block id the error is about, or the expected length of a size
    /// mismatch; 0 otherwise.
    pub fn subject(&self) -> i64 {
        match self {
            HeapError::InvalidHandle(id) | HeapError::RefCountUnderflow(id) => *id,
            HeapError::SizeMismatch { expected, .. } => {
                i64::try_from(*expected).unwrap_or(i64::MAX)
            }
            _ => 0,
        }
    }

    /// The byte count the error is about: the requested size of a failed
    /// allocation or the actual length of a size mismatch.
    pub fn detail(&self) -> u64 {
        match self {
            HeapError::Allocation { size } => u64::try_from(*size).unwrap_or(u64::MAX),
            HeapError::SizeMismatch { actual, .. } => u64::try_from(*actual).unwrap_or(u64::MAX),
            _ => 0,
        }
    }

    /// Detail text without the variant prefix, for variants that carry one.
    pub fn message(&self) -> String {
        match self {
            HeapError::Connection(msg)
            | HeapError::Bounds(msg)
            | HeapError::Protocol(msg)
            | HeapError::InternalError(msg) => msg.clone(),
            _ => self.to_string(),
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            code: self.code() as u16,
            subject: self.subject(),
            detail: self.detail(),
            message: self.message(),
        }
    }

    /// Rebuilds a typed error from its wire form. Unknown codes become `Protocol`.
    pub fn from_structured(structured: &StructuredError) -> Self {
        let message = structured.message.clone();
        let detail = usize::try_from(structured.detail).unwrap_or(usize::MAX);
        match ErrorCode::from_u16(structured.code) {
            Some(ErrorCode::Connection) => HeapError::Connection(message),
            Some(ErrorCode::NotConnected) => HeapError::NotConnected,
            Some(ErrorCode::Allocation) => HeapError::Allocation { size: detail },
            Some(ErrorCode::Bounds) => HeapError::Bounds(message),
            Some(ErrorCode::InvalidHandle) => HeapError::InvalidHandle(structured.subject),
            Some(ErrorCode::Protocol) => HeapError::Protocol(message),
            Some(ErrorCode::SizeMismatch) => HeapError::SizeMismatch {
                expected: usize::try_from(structured.subject).unwrap_or(0),
                actual: detail,
            },
            Some(ErrorCode::NullHandle) => HeapError::NullHandle("used remotely"),
            Some(ErrorCode::RefCountUnderflow) => HeapError::RefCountUnderflow(structured.subject),
            Some(ErrorCode::Internal) => HeapError::InternalError(message),
            None => HeapError::Protocol(format!(
                "Unknown error code {}: {}",
                structured.code, message
            )),
        }
    }

    /// Returns true if the error is transient and may be retried by the caller
    pub fn is_retryable(&self) -> bool {
        match self {
            // Space may be reclaimed by the next collector cycle.
            HeapError::Allocation { .. } => true,
            HeapError::Connection(msg) => {
                msg.contains("timed out") || msg.contains("refused")
            }
            _ => false,
        }
    }

    /// Returns true if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, HeapError::Connection(_) | HeapError::NotConnected)
    }

    /// Returns the error category for decision-making
    pub fn error_category(&self) -> ErrorCategory {
        if matches!(
            self,
            HeapError::Bounds(_) | HeapError::SizeMismatch { .. } | HeapError::NullHandle(_)
        ) {
            return ErrorCategory::Validation;
        }
        if self.is_connection_error() {
            return ErrorCategory::ConnectionLost;
        }
        if self.is_retryable() {
            return ErrorCategory::Transient;
        }
        ErrorCategory::Fatal
    }
}

/// Wire form of a failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredError {
    pub code: u16,
    pub subject: i64,
    pub detail: u64,
    pub message: String,
}

impl StructuredError {
    pub const HEADER_SIZE: usize = 22;

    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Self::HEADER_SIZE + self.message.len());
        buffer.extend_from_slice(&self.code.to_le_bytes());
        buffer.extend_from_slice(&self.subject.to_le_bytes());
        buffer.extend_from_slice(&self.detail.to_le_bytes());
        let msg_bytes = self.message.as_bytes();
        buffer.extend_from_slice(&(msg_bytes.len() as u32).to_le_bytes());
        buffer.extend_from_slice(msg_bytes);
        buffer
    }

    /// Returns the error and the number of bytes consumed.
    pub fn deserialize(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < Self::HEADER_SIZE {
            return None;
        }

        let code = u16::from_le_bytes([data[0], data[1]]);

        let mut subject = [0u8; 8];
        subject.copy_from_slice(&data[2..10]);
        let subject = i64::from_le_bytes(subject);

        let mut detail = [0u8; 8];
        detail.copy_from_slice(&data[10..18]);
        let detail = u64::from_le_bytes(detail);

        let msg_len = u32::from_le_bytes([data[18], data[19], data[20], data[21]]) as usize;

        let end = Self::HEADER_SIZE.checked_add(msg_len)?;
        if data.len() < end {
            return None;
        }

        let message = String::from_utf8(data[Self::HEADER_SIZE..end].to_vec()).ok()?;

        Some((
            Self {
                code,
                subject,
                detail,
                message,
            },
            end,
        ))
    }
}

pub type Result<T> = std::result::Result<T, HeapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_error_variants() {
        let err1 = HeapError::NotConnected;
        assert_eq!(err1.to_string(), "Not connected to memory manager");

        let err2 = HeapError::InvalidHandle(42);
        assert_eq!(err2.to_string(), "Invalid handle ID: 42");

        let err3 = HeapError::Allocation { size: 128 };
        assert_eq!(
            err3.to_string(),
            "Allocation failed: no free region of 128 bytes"
        );

        let err4 = HeapError::SizeMismatch {
            expected: 4,
            actual: 2,
        };
        assert_eq!(err4.to_string(), "Size mismatch: expected 4 bytes, got 2");

        let err5 = HeapError::Bounds("8 bytes into 4".to_string());
        assert!(err5.to_string().contains("8 bytes into 4"));

        let err6 = HeapError::NullHandle("dereferenced");
        assert_eq!(err6.to_string(), "Null handle cannot be dereferenced");

        let err7 = HeapError::InternalError("Lock poisoned".to_string());
        assert!(err7.to_string().contains("Lock poisoned"));
    }

    #[test]
    fn test_message_strips_prefix() {
        let err = HeapError::Protocol("bad magic".to_string());
        assert_eq!(err.message(), "bad magic");

        let err = HeapError::InvalidHandle(7);
        assert_eq!(err.message(), "Invalid handle ID: 7");
    }

    #[test]
    fn test_error_code_roundtrip_through_u16() {
        for code in 1u16..=10 {
            let parsed = ErrorCode::from_u16(code).expect("known code");
            assert_eq!(parsed as u16, code);
        }
        assert!(ErrorCode::from_u16(0).is_none());
        assert!(ErrorCode::from_u16(99).is_none());
    }

    #[test]
    fn test_structured_error_serialize() {
        let error = StructuredError {
            code: ErrorCode::InvalidHandle as u16,
            subject: 42,
            detail: 7,
            message: "Test error".to_string(),
        };

        let serialized = error.serialize();

        // Format: [code: 2][subject: 8][detail: 8][msg_len: 4][message: N]
        assert_eq!(u16::from_le_bytes([serialized[0], serialized[1]]), 5);
        let mut subject = [0u8; 8];
        subject.copy_from_slice(&serialized[2..10]);
        assert_eq!(i64::from_le_bytes(subject), 42);
        let mut detail = [0u8; 8];
        detail.copy_from_slice(&serialized[10..18]);
        assert_eq!(u64::from_le_bytes(detail), 7);
        let msg_len = u32::from_le_bytes([
            serialized[18],
            serialized[19],
            serialized[20],
            serialized[21],
        ]) as usize;
        assert_eq!(msg_len, "Test error".len());
        assert_eq!(&serialized[22..], b"Test error");
    }

    #[test]
    fn test_structured_error_deserialize_reports_consumed_bytes() {
        let error = StructuredError {
            code: 3,
            subject: 0,
            detail: 64,
            message: "full".to_string(),
        };
        let mut data = error.serialize();
        let expected_len = data.len();
        data.extend_from_slice(&[0xAA, 0xBB]);

        let (decoded, consumed) = StructuredError::deserialize(&data).expect("Should deserialize");
        assert_eq!(decoded, error);
        assert_eq!(consumed, expected_len);
    }

    #[test]
    fn test_structured_error_deserialize_invalid_data() {
        let data = vec![1, 2, 3];
        assert!(StructuredError::deserialize(&data).is_none());

        // Header only, message length promises 10 bytes that are missing
        let mut data = vec![0u8; 22];
        data[18..22].copy_from_slice(&10u32.to_le_bytes());
        assert!(StructuredError::deserialize(&data).is_none());
    }

    #[test]
    fn test_structured_error_unicode_message() {
        let error = StructuredError {
            code: 4,
            subject: 0,
            detail: 0,
            message: "Erro em português: €$¥".to_string(),
        };

        let (decoded, _) =
            StructuredError::deserialize(&error.serialize()).expect("Should deserialize");
        assert_eq!(decoded.message, error.message);
    }

    #[test]
    fn test_typed_error_survives_wire_form() {
        let cases = vec![
            HeapError::InvalidHandle(9),
            HeapError::Allocation { size: 4096 },
            HeapError::Allocation { size: usize::MAX },
            HeapError::SizeMismatch {
                expected: 8,
                actual: 3,
            },
            HeapError::Bounds("value of 8 bytes exceeds block 3 capacity of 4 bytes".to_string()),
            HeapError::RefCountUnderflow(11),
            HeapError::InternalError("Failed to lock block table mutex".to_string()),
            HeapError::Protocol("Invalid magic number".to_string()),
        ];

        for err in cases {
            let rebuilt = HeapError::from_structured(&err.to_structured());
            assert_eq!(rebuilt, err);
        }
    }

    #[test]
    fn test_unknown_code_becomes_protocol_error() {
        let structured = StructuredError {
            code: 500,
            subject: 0,
            detail: 0,
            message: "mystery".to_string(),
        };
        match HeapError::from_structured(&structured) {
            HeapError::Protocol(msg) => assert!(msg.contains("500")),
            other => panic!("Expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_is_connection_error() {
        assert!(HeapError::NotConnected.is_connection_error());
        assert!(HeapError::Connection("refused".to_string()).is_connection_error());
        assert!(!HeapError::InvalidHandle(1).is_connection_error());
        assert!(!HeapError::Protocol("x".to_string()).is_connection_error());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            HeapError::Bounds("too big".to_string()).error_category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            HeapError::NullHandle("written").error_category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            HeapError::NotConnected.error_category(),
            ErrorCategory::ConnectionLost
        );
        assert_eq!(
            HeapError::Allocation { size: 10 }.error_category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            HeapError::InvalidHandle(999).error_category(),
            ErrorCategory::Fatal,
            "InvalidHandle should map to Fatal category"
        );
    }
}
