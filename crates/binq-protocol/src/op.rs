use thiserror::Error;

/// Client-originated command opcodes. Server-originated frames reuse the
/// same header layout but the op byte carries no semantics there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    Create = 1,
    Publish = 2,
    Receive = 3,
    Ack = 4,
    /// Synthetic: never sent by a client, generated by the server when a
    /// connection's read side closes so the dispatcher can evict it.
    Oust = 5,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown op byte {0}")]
pub struct UnknownOp(pub u8);

impl Op {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Op {
    type Error = UnknownOp;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Op::Create),
            2 => Ok(Op::Publish),
            3 => Ok(Op::Receive),
            4 => Ok(Op::Ack),
            5 => Ok(Op::Oust),
            other => Err(UnknownOp(other)),
        }
    }
}
