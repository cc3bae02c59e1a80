use crate::error::Result;
use crate::protocol::{CallArg, CallResult, SyncData};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Json,
    MessagePack,
}

impl BinaryFormat {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryFormat::Json => "JSON",
            BinaryFormat::MessagePack => "MessagePack",
        }
    }
}

/// Envelope codec shared by transports.
#[derive(Debug, Clone, Copy)]
pub struct BinarySerializer {
    format: BinaryFormat,
}

impl BinarySerializer {
    pub fn new(format: BinaryFormat) -> Self {
        Self { format }
    }

    pub fn json() -> Self {
        Self::new(BinaryFormat::Json)
    }

    pub fn messagepack() -> Self {
        Self::new(BinaryFormat::MessagePack)
    }

    pub fn format(&self) -> BinaryFormat {
        self.format
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        match self.format {
            BinaryFormat::Json => Ok(Bytes::from(serde_json::to_vec(value)?)),
            // named encoding keeps the field names so maps of JSON values survive the trip
            BinaryFormat::MessagePack => Ok(Bytes::from(rmp_serde::to_vec_named(value)?)),
        }
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self.format {
            BinaryFormat::Json => Ok(serde_json::from_slice(data)?),
            BinaryFormat::MessagePack => Ok(rmp_serde::from_slice(data)?),
        }
    }

    pub fn serialize_sync(&self, data: &SyncData) -> Result<Bytes> {
        self.encode(data)
    }

    pub fn deserialize_sync(&self, data: &[u8]) -> Result<SyncData> {
        self.decode(data)
    }

    pub fn serialize_call(&self, arg: &CallArg) -> Result<Bytes> {
        self.encode(arg)
    }

    pub fn deserialize_call(&self, data: &[u8]) -> Result<CallArg> {
        self.decode(data)
    }

    pub fn serialize_result(&self, result: &CallResult) -> Result<Bytes> {
        self.encode(result)
    }

    pub fn deserialize_result(&self, data: &[u8]) -> Result<CallResult> {
        self.decode(data)
    }
}
