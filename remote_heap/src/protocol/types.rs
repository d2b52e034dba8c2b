use crate::engine::{BlockId, NULL_BLOCK_ID};
use crate::error::{HeapError, Result, StructuredError};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    Create = 1,
    Set = 2,
    Get = 3,
    IncreaseRefCount = 4,
    DecreaseRefCount = 5,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Create),
            2 => Some(Self::Set),
            3 => Some(Self::Get),
            4 => Some(Self::IncreaseRefCount),
            5 => Some(Self::DecreaseRefCount),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Create => "Create",
            OpCode::Set => "Set",
            OpCode::Get => "Get",
            OpCode::IncreaseRefCount => "IncreaseRefCount",
            OpCode::DecreaseRefCount => "DecreaseRefCount",
        }
    }

    /// Operations after which the snapshot sink is notified.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            OpCode::Create | OpCode::Set | OpCode::DecreaseRefCount
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Create { size: u64, type_tag: String },
    Set { id: BlockId, value: Vec<u8> },
    Get { id: BlockId },
    IncreaseRefCount { id: BlockId },
    DecreaseRefCount { id: BlockId },
}

impl Request {
    pub fn op_code(&self) -> OpCode {
        match self {
            Request::Create { .. } => OpCode::Create,
            Request::Set { .. } => OpCode::Set,
            Request::Get { .. } => OpCode::Get,
            Request::IncreaseRefCount { .. } => OpCode::IncreaseRefCount,
            Request::DecreaseRefCount { .. } => OpCode::DecreaseRefCount,
        }
    }

    /// Target block, for every operation except `Create`.
    pub fn target(&self) -> Option<BlockId> {
        match self {
            Request::Create { .. } => None,
            Request::Set { id, .. }
            | Request::Get { id }
            | Request::IncreaseRefCount { id }
            | Request::DecreaseRefCount { id } => Some(*id),
        }
    }
}

/// One reply per request. `id` is only meaningful for `Create` and `value`
/// only for `Get`; both are empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub op: OpCode,
    pub success: bool,
    pub id: BlockId,
    pub value: Vec<u8>,
    pub error: Option<StructuredError>,
}

impl Response {
    pub fn ok(op: OpCode) -> Self {
        Self {
            op,
            success: true,
            id: NULL_BLOCK_ID,
            value: Vec::new(),
            error: None,
        }
    }

    pub fn created(id: BlockId) -> Self {
        Self {
            id,
            ..Self::ok(OpCode::Create)
        }
    }

    pub fn with_value(value: Vec<u8>) -> Self {
        Self {
            value,
            ..Self::ok(OpCode::Get)
        }
    }

    pub fn failure(op: OpCode, error: &HeapError) -> Self {
        Self {
            op,
            success: false,
            id: NULL_BLOCK_ID,
            value: Vec::new(),
            error: Some(error.to_structured()),
        }
    }

    /// Turns an unsuccessful response back into the server's typed error.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(match &self.error {
            Some(structured) => HeapError::from_structured(structured),
            None => HeapError::Protocol(format!(
                "{} failed without error detail",
                self.op.name()
            )),
        })
    }
}
