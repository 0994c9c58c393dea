//! Binary command/response format spoken between the sequencer and the engine.
//!
//! All integers are big-endian. Every variable-length field is preceded by
//! its length; decoding validates each length against the remaining input
//! and rejects trailing bytes.

use std::io::Cursor;

use byteorder::{
    BigEndian,
    ReadBytesExt,
};
use bytes::{
    BufMut,
    Bytes,
    BytesMut,
};
use thiserror::Error;

use crate::hash::{
    HashFunction,
    Mode,
};

const OP_CREATE_RING: u8 = 1;
const OP_DELETE_RING: u8 = 2;
const OP_ADD_NODE: u8 = 3;
const OP_REMOVE_NODE: u8 = 4;
const OP_FIND_NODE: u8 = 5;
const OP_SET_MODE: u8 = 6;
const OP_CALC_HASH: u8 = 7;
const OP_GET_NODES: u8 = 8;

const TAG_OK: u8 = 0x00;
const TAG_RING_INDEX: u8 = 0x01;
const TAG_BINARY: u8 = 0x02;
const TAG_LIST: u8 = 0x03;
const TAG_RING_NOT_FOUND: u8 = 0x10;
const TAG_NODE_NOT_FOUND: u8 = 0x11;
const TAG_INVALID_RING: u8 = 0x12;
const TAG_UNKNOWN: u8 = 0x13;
const TAG_INVALID_ARGUMENT: u8 = 0x14;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),
    #[error("unknown response tag: {0}")]
    UnknownTag(u8),
    #[error("frame truncated while reading {0}")]
    Truncated(&'static str),
    #[error("invalid {field} selector: {value}")]
    InvalidSelector { field: &'static str, value: u8 },
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// A single engine operation addressed by ring index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateRing { replicas: u32, hash_fn: HashFunction },
    DeleteRing { index: u32 },
    AddNode { index: u32, node: Bytes },
    RemoveNode { index: u32, node: Bytes },
    FindNode { index: u32, key: Bytes },
    SetMode { index: u32, mode: Mode },
    CalcHash { index: u32, key: Bytes },
    GetNodes { index: u32, count: u32, key: Bytes },
}

/// Named engine failures carried in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    RingNotFound,
    NodeNotFound,
    InvalidRing,
    Unknown,
    InvalidArgument,
}

impl Status {
    fn tag(self) -> u8 {
        match self {
            Status::RingNotFound => TAG_RING_NOT_FOUND,
            Status::NodeNotFound => TAG_NODE_NOT_FOUND,
            Status::InvalidRing => TAG_INVALID_RING,
            Status::Unknown => TAG_UNKNOWN,
            Status::InvalidArgument => TAG_INVALID_ARGUMENT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Status::RingNotFound => "ring_not_found",
            Status::NodeNotFound => "node_not_found",
            Status::InvalidRing => "invalid_ring",
            Status::Unknown => "unknown",
            Status::InvalidArgument => "invalid_argument",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    RingIndex(u32),
    Binary(Bytes),
    /// Elements must be non-empty and fit a 2-byte length.
    List(Vec<Bytes>),
    Error(Status),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Ok => "ok",
            Response::RingIndex(_) => "ring_index",
            Response::Binary(_) => "binary",
            Response::List(_) => "list",
            Response::Error(status) => status.name(),
        }
    }
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateRing { .. } => "create_ring",
            Command::DeleteRing { .. } => "delete_ring",
            Command::AddNode { .. } => "add_node",
            Command::RemoveNode { .. } => "remove_node",
            Command::FindNode { .. } => "find_node",
            Command::SetMode { .. } => "set_mode",
            Command::CalcHash { .. } => "calc_hash",
            Command::GetNodes { .. } => "get_nodes",
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Command::CreateRing { replicas, hash_fn } => {
                buf.put_u8(OP_CREATE_RING);
                buf.put_u32(*replicas);
                buf.put_u8(hash_fn.selector());
            },
            Command::DeleteRing { index } => {
                buf.put_u8(OP_DELETE_RING);
                buf.put_u32(*index);
            },
            Command::AddNode { index, node } => {
                buf.put_u8(OP_ADD_NODE);
                buf.put_u32(*index);
                put_blob(&mut buf, node);
            },
            Command::RemoveNode { index, node } => {
                buf.put_u8(OP_REMOVE_NODE);
                buf.put_u32(*index);
                put_blob(&mut buf, node);
            },
            Command::FindNode { index, key } => {
                buf.put_u8(OP_FIND_NODE);
                buf.put_u32(*index);
                put_blob(&mut buf, key);
            },
            Command::SetMode { index, mode } => {
                buf.put_u8(OP_SET_MODE);
                buf.put_u32(*index);
                buf.put_u8(mode.selector());
            },
            Command::CalcHash { index, key } => {
                buf.put_u8(OP_CALC_HASH);
                buf.put_u32(*index);
                put_blob(&mut buf, key);
            },
            Command::GetNodes { index, count, key } => {
                buf.put_u8(OP_GET_NODES);
                buf.put_u32(*index);
                buf.put_u32(*count);
                put_blob(&mut buf, key);
            },
        }
        buf.freeze()
    }

    pub fn decode(frame: &Bytes) -> Result<Self, DecodeError> {
        let mut reader = FrameReader::new(frame);
        let command = match reader.u8("opcode").map_err(|_| DecodeError::Empty)? {
            OP_CREATE_RING => {
                let replicas = reader.u32("replicas")?;
                let selector = reader.u8("hash function")?;
                let hash_fn = HashFunction::try_from(selector).map_err(|_| DecodeError::InvalidSelector {
                    field: "hash function",
                    value: selector,
                })?;
                Command::CreateRing { replicas, hash_fn }
            },
            OP_DELETE_RING => Command::DeleteRing {
                index: reader.u32("ring index")?,
            },
            OP_ADD_NODE => Command::AddNode {
                index: reader.u32("ring index")?,
                node: reader.blob("node")?,
            },
            OP_REMOVE_NODE => Command::RemoveNode {
                index: reader.u32("ring index")?,
                node: reader.blob("node")?,
            },
            OP_FIND_NODE => Command::FindNode {
                index: reader.u32("ring index")?,
                key: reader.blob("key")?,
            },
            OP_SET_MODE => {
                let index = reader.u32("ring index")?;
                let selector = reader.u8("mode")?;
                let mode = Mode::try_from(selector).map_err(|_| DecodeError::InvalidSelector {
                    field: "mode",
                    value: selector,
                })?;
                Command::SetMode { index, mode }
            },
            OP_CALC_HASH => Command::CalcHash {
                index: reader.u32("ring index")?,
                key: reader.blob("key")?,
            },
            OP_GET_NODES => Command::GetNodes {
                index: reader.u32("ring index")?,
                count: reader.u32("count")?,
                key: reader.blob("key")?,
            },
            other => return Err(DecodeError::UnknownOpcode(other)),
        };
        reader.finish()?;
        Ok(command)
    }
}

impl Response {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Response::Ok => buf.put_u8(TAG_OK),
            Response::RingIndex(index) => {
                buf.put_u8(TAG_RING_INDEX);
                buf.put_u32(*index);
            },
            Response::Binary(data) => {
                buf.put_u8(TAG_BINARY);
                put_blob(&mut buf, data);
            },
            Response::List(items) => {
                buf.put_u8(TAG_LIST);
                for item in items {
                    buf.put_u16(item.len() as u16);
                    buf.put_slice(item);
                }
                buf.put_u16(0);
            },
            Response::Error(status) => buf.put_u8(status.tag()),
        }
        buf.freeze()
    }

    pub fn decode(frame: &Bytes) -> Result<Self, DecodeError> {
        let mut reader = FrameReader::new(frame);
        let response = match reader.u8("tag").map_err(|_| DecodeError::Empty)? {
            TAG_OK => Response::Ok,
            TAG_RING_INDEX => Response::RingIndex(reader.u32("ring index")?),
            TAG_BINARY => Response::Binary(reader.blob("payload")?),
            TAG_LIST => {
                let mut items = Vec::new();
                loop {
                    let len = reader.u16("list element length")? as usize;
                    if len == 0 {
                        break;
                    }
                    items.push(reader.take(len, "list element")?);
                }
                Response::List(items)
            },
            TAG_RING_NOT_FOUND => Response::Error(Status::RingNotFound),
            TAG_NODE_NOT_FOUND => Response::Error(Status::NodeNotFound),
            TAG_INVALID_RING => Response::Error(Status::InvalidRing),
            TAG_UNKNOWN => Response::Error(Status::Unknown),
            TAG_INVALID_ARGUMENT => Response::Error(Status::InvalidArgument),
            other => return Err(DecodeError::UnknownTag(other)),
        };
        reader.finish()?;
        Ok(response)
    }
}

fn put_blob(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

struct FrameReader<'a> {
    frame: &'a Bytes,
    cursor: Cursor<&'a [u8]>,
}

impl<'a> FrameReader<'a> {
    fn new(frame: &'a Bytes) -> Self {
        Self {
            frame,
            cursor: Cursor::new(frame.as_ref()),
        }
    }

    fn remaining(&self) -> usize {
        self.frame.len() - self.cursor.position() as usize
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        self.cursor.read_u8().map_err(|_| DecodeError::Truncated(field))
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|_| DecodeError::Truncated(field))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.cursor
            .read_u32::<BigEndian>()
            .map_err(|_| DecodeError::Truncated(field))
    }

    fn blob(&mut self, field: &'static str) -> Result<Bytes, DecodeError> {
        let len = self.u32(field)? as usize;
        self.take(len, field)
    }

    /// Zero-copy slice of the next `len` bytes.
    fn take(&mut self, len: usize, field: &'static str) -> Result<Bytes, DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated(field));
        }
        let start = self.cursor.position() as usize;
        self.cursor.set_position((start + len) as u64);
        Ok(self.frame.slice(start..start + len))
    }

    fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
