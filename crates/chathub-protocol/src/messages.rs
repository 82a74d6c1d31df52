//! Typed message payloads for the chat hub wire protocol (§6).
//!
//! Every payload implements [`Message`], which pairs a fixed `MSG_TYPE` byte
//! with symmetric `encode`/`decode` methods built on the primitives in
//! [`crate::wire`]. [`encode_message`]/[`decode_message`] turn a `Message`
//! into/out of a [`Frame`] so handlers never touch the wire format directly.

use bytes::BytesMut;

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::wire::{WireReader, WireWriter};

/// Message-type IDs. Numbering is frozen for wire compatibility (§6).
pub mod msg_type {
    pub const SET_NICKNAME: u8 = 0x01;
    pub const LIST_CHANNELS: u8 = 0x02;
    pub const JOIN_CHANNEL: u8 = 0x03;
    pub const LEAVE_CHANNEL: u8 = 0x04;
    pub const LIST_MESSAGES: u8 = 0x05;
    pub const POST_MESSAGE: u8 = 0x06;
    pub const DELETE_MESSAGE: u8 = 0x07;
    pub const PING: u8 = 0x08;
    pub const DISCONNECT: u8 = 0x09;
    pub const EDIT_MESSAGE: u8 = 0x0a;
    pub const REGISTER_USER: u8 = 0x0b;
    pub const AUTH: u8 = 0x0c;
    pub const LOGOUT: u8 = 0x0d;
    pub const CREATE_CHANNEL: u8 = 0x0e;
    pub const DELETE_CHANNEL: u8 = 0x0f;
    pub const ADMIN_BAN: u8 = 0x10;
    pub const ADMIN_UNBAN: u8 = 0x11;

    pub const SUBSCRIBE_THREAD: u8 = 0x51;
    pub const UNSUBSCRIBE_THREAD: u8 = 0x52;
    pub const SUBSCRIBE_CHANNEL: u8 = 0x53;
    pub const UNSUBSCRIBE_CHANNEL: u8 = 0x54;

    pub const LIST_SERVERS: u8 = 0x60;
    pub const REGISTER_SERVER: u8 = 0x61;
    pub const VERIFY_REGISTRATION: u8 = 0x62;
    pub const VERIFY_RESPONSE: u8 = 0x63;
    pub const HEARTBEAT: u8 = 0x64;
    pub const HEARTBEAT_ACK: u8 = 0x65;
    pub const REGISTER_ACK: u8 = 0x66;

    pub const NICKNAME_RESPONSE: u8 = 0x90;
    pub const ERROR: u8 = 0x91;
    pub const CHANNEL_LIST: u8 = 0x92;
    pub const JOIN_RESPONSE: u8 = 0x93;
    pub const LEAVE_RESPONSE: u8 = 0x94;
    pub const MESSAGE_LIST: u8 = 0x95;
    pub const MESSAGE_POSTED: u8 = 0x96;
    pub const NEW_MESSAGE: u8 = 0x97;
    pub const MESSAGE_DELETED: u8 = 0x98;
    pub const SERVER_CONFIG: u8 = 0x99;
    pub const SUBSCRIBE_OK: u8 = 0x9a;
    pub const AUTH_RESPONSE: u8 = 0x9b;
    pub const REGISTER_RESPONSE: u8 = 0x9c;
    pub const CHANNEL_PRESENCE: u8 = 0x9d;
    pub const SERVER_PRESENCE: u8 = 0x9e;
    pub const EDIT_RESPONSE: u8 = 0x9f;
    pub const ADMIN_RESPONSE: u8 = 0xa0;
    pub const LIST_SERVERS_RESPONSE: u8 = 0xa1;
}

/// Stable `u16` error codes carried in [`ErrorMsg`] (§6).
pub mod error_code {
    pub const INVALID_FORMAT: u16 = 1000;
    pub const UNSUPPORTED_TYPE: u16 = 1001;
    pub const LIST_FAILED: u16 = 1002;
    pub const NICKNAME_REQUIRED: u16 = 2000;
    pub const SERVER_NOT_REGISTERED: u16 = 4000;
    pub const CHAT_NO_THREAD: u16 = 6000;
    pub const MESSAGE_TOO_LONG: u16 = 6001;
    pub const SUBSCRIPTION_LIMIT: u16 = 6002;
    pub const PERMISSION_DENIED: u16 = 6003;
    pub const NOT_FOUND: u16 = 6004;
    pub const INTERNAL_ERROR: u16 = 9000;
    pub const DATABASE_ERROR: u16 = 9001;
}

/// A wire message with a fixed frame type and symmetric codec.
pub trait Message: Sized {
    const MSG_TYPE: u8;

    fn encode(&self, w: &mut WireWriter<'_>);
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError>;
}

pub fn encode_message<M: Message>(msg: &M) -> Frame {
    let mut buf = BytesMut::new();
    {
        let mut w = WireWriter::new(&mut buf);
        msg.encode(&mut w);
    }
    Frame::new(M::MSG_TYPE, buf.freeze())
}

pub fn decode_message<M: Message>(frame: &Frame) -> Result<M, ProtocolError> {
    if frame.msg_type != M::MSG_TYPE {
        return Err(ProtocolError::KindMismatch(
            std::any::type_name::<M>(),
            frame.msg_type,
        ));
    }
    let mut r = WireReader::new(&frame.payload);
    M::decode(&mut r)
}

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Chat,
    Forum,
}

impl ChannelType {
    fn to_u8(self) -> u8 {
        match self {
            ChannelType::Chat => 0,
            ChannelType::Forum => 1,
        }
    }

    fn from_u8(v: u8) -> Result<Self, ProtocolError> {
        match v {
            0 => Ok(ChannelType::Chat),
            1 => Ok(ChannelType::Forum),
            _ => Err(ProtocolError::InvalidUtf8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: u64,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub channel_type: ChannelType,
    pub retention_hours: u32,
    pub is_private: bool,
    pub user_count: u32,
}

impl ChannelInfo {
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.id);
        w.put_str(&self.name);
        w.put_str(&self.display_name);
        w.put_option(&self.description, |w, v| w.put_str(v));
        w.put_u8(self.channel_type.to_u8());
        w.put_u32(self.retention_hours);
        w.put_bool(self.is_private);
        w.put_u32(self.user_count);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: r.get_u64()?,
            name: r.get_str()?,
            display_name: r.get_str()?,
            description: r.get_option(|r| r.get_str())?,
            channel_type: ChannelType::from_u8(r.get_u8()?)?,
            retention_hours: r.get_u32()?,
            is_private: r.get_bool()?,
            user_count: r.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub id: u64,
    pub channel_id: u64,
    pub subchannel_id: Option<u64>,
    pub parent_id: Option<u64>,
    pub thread_root_id: Option<u64>,
    pub author_user_id: Option<u64>,
    pub author_nickname: String,
    pub content: String,
    pub created_at: i64,
    pub edited_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl MessageInfo {
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.id);
        w.put_u64(self.channel_id);
        w.put_option(&self.subchannel_id, |w, v| w.put_u64(*v));
        w.put_option(&self.parent_id, |w, v| w.put_u64(*v));
        w.put_option(&self.thread_root_id, |w, v| w.put_u64(*v));
        w.put_option(&self.author_user_id, |w, v| w.put_u64(*v));
        w.put_str(&self.author_nickname);
        w.put_str(&self.content);
        w.put_i64(self.created_at);
        w.put_option(&self.edited_at, |w, v| w.put_i64(*v));
        w.put_option(&self.deleted_at, |w, v| w.put_i64(*v));
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: r.get_u64()?,
            channel_id: r.get_u64()?,
            subchannel_id: r.get_option(|r| r.get_u64())?,
            parent_id: r.get_option(|r| r.get_u64())?,
            thread_root_id: r.get_option(|r| r.get_u64())?,
            author_user_id: r.get_option(|r| r.get_u64())?,
            author_nickname: r.get_str()?,
            content: r.get_str()?,
            created_at: r.get_i64()?,
            edited_at: r.get_option(|r| r.get_i64())?,
            deleted_at: r.get_option(|r| r.get_i64())?,
        })
    }
}

macro_rules! wire_message {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }, $msg_type:expr, $encode:item, $decode:item) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            $(pub $field: $ty),*
        }

        impl Message for $name {
            const MSG_TYPE: u8 = $msg_type;
            $encode
            $decode
        }
    };
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

wire_message!(
    SetNickname { nickname: String },
    msg_type::SET_NICKNAME,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_str(&self.nickname);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { nickname: r.get_str()? })
    }
);

wire_message!(
    ListChannels {},
    msg_type::LIST_CHANNELS,
    fn encode(&self, _w: &mut WireWriter<'_>) {},
    fn decode(_r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {})
    }
);

wire_message!(
    JoinChannel { channel_id: u64 },
    msg_type::JOIN_CHANNEL,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.channel_id);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { channel_id: r.get_u64()? })
    }
);

wire_message!(
    LeaveChannel { channel_id: u64 },
    msg_type::LEAVE_CHANNEL,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.channel_id);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { channel_id: r.get_u64()? })
    }
);

wire_message!(
    ListMessages {
        channel_id: u64,
        subchannel_id: Option<u64>,
        parent_id: Option<u64>,
        limit: u16,
        before: Option<i64>,
        after: Option<i64>
    },
    msg_type::LIST_MESSAGES,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.channel_id);
        w.put_option(&self.subchannel_id, |w, v| w.put_u64(*v));
        w.put_option(&self.parent_id, |w, v| w.put_u64(*v));
        w.put_u16(self.limit);
        w.put_option(&self.before, |w, v| w.put_i64(*v));
        w.put_option(&self.after, |w, v| w.put_i64(*v));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel_id: r.get_u64()?,
            subchannel_id: r.get_option(|r| r.get_u64())?,
            parent_id: r.get_option(|r| r.get_u64())?,
            limit: r.get_u16()?,
            before: r.get_option(|r| r.get_i64())?,
            after: r.get_option(|r| r.get_i64())?,
        })
    }
);

wire_message!(
    PostMessage {
        channel_id: u64,
        subchannel_id: Option<u64>,
        parent_id: Option<u64>,
        content: String
    },
    msg_type::POST_MESSAGE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.channel_id);
        w.put_option(&self.subchannel_id, |w, v| w.put_u64(*v));
        w.put_option(&self.parent_id, |w, v| w.put_u64(*v));
        w.put_str(&self.content);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel_id: r.get_u64()?,
            subchannel_id: r.get_option(|r| r.get_u64())?,
            parent_id: r.get_option(|r| r.get_u64())?,
            content: r.get_str()?,
        })
    }
);

wire_message!(
    DeleteMessage { message_id: u64 },
    msg_type::DELETE_MESSAGE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.message_id);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { message_id: r.get_u64()? })
    }
);

wire_message!(
    EditMessage { message_id: u64, content: String },
    msg_type::EDIT_MESSAGE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.message_id);
        w.put_str(&self.content);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            message_id: r.get_u64()?,
            content: r.get_str()?,
        })
    }
);

wire_message!(
    Ping {},
    msg_type::PING,
    fn encode(&self, _w: &mut WireWriter<'_>) {},
    fn decode(_r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {})
    }
);

wire_message!(
    Disconnect {},
    msg_type::DISCONNECT,
    fn encode(&self, _w: &mut WireWriter<'_>) {},
    fn decode(_r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {})
    }
);

wire_message!(
    RegisterUser { nickname: String, password_hash: String },
    msg_type::REGISTER_USER,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_str(&self.nickname);
        w.put_str(&self.password_hash);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            nickname: r.get_str()?,
            password_hash: r.get_str()?,
        })
    }
);

wire_message!(
    Auth { nickname: String, password_hash: String },
    msg_type::AUTH,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_str(&self.nickname);
        w.put_str(&self.password_hash);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            nickname: r.get_str()?,
            password_hash: r.get_str()?,
        })
    }
);

wire_message!(
    Logout {},
    msg_type::LOGOUT,
    fn encode(&self, _w: &mut WireWriter<'_>) {},
    fn decode(_r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {})
    }
);

wire_message!(
    CreateChannel {
        name: String,
        display_name: String,
        description: Option<String>,
        channel_type: ChannelType,
        retention_hours: u32,
        is_private: bool
    },
    msg_type::CREATE_CHANNEL,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_str(&self.name);
        w.put_str(&self.display_name);
        w.put_option(&self.description, |w, v| w.put_str(v));
        w.put_u8(self.channel_type.to_u8());
        w.put_u32(self.retention_hours);
        w.put_bool(self.is_private);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: r.get_str()?,
            display_name: r.get_str()?,
            description: r.get_option(|r| r.get_str())?,
            channel_type: ChannelType::from_u8(r.get_u8()?)?,
            retention_hours: r.get_u32()?,
            is_private: r.get_bool()?,
        })
    }
);

wire_message!(
    DeleteChannel { channel_id: u64 },
    msg_type::DELETE_CHANNEL,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.channel_id);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { channel_id: r.get_u64()? })
    }
);

wire_message!(
    AdminBan {
        target_nickname: String,
        reason: String,
        shadowban: bool,
        duration_secs: Option<u64>
    },
    msg_type::ADMIN_BAN,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_str(&self.target_nickname);
        w.put_str(&self.reason);
        w.put_bool(self.shadowban);
        w.put_option(&self.duration_secs, |w, v| w.put_u64(*v));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            target_nickname: r.get_str()?,
            reason: r.get_str()?,
            shadowban: r.get_bool()?,
            duration_secs: r.get_option(|r| r.get_u64())?,
        })
    }
);

wire_message!(
    AdminUnban { ban_id: u64 },
    msg_type::ADMIN_UNBAN,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.ban_id);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { ban_id: r.get_u64()? })
    }
);

wire_message!(
    SubscribeThread { thread_id: u64 },
    msg_type::SUBSCRIBE_THREAD,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.thread_id);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { thread_id: r.get_u64()? })
    }
);

wire_message!(
    UnsubscribeThread { thread_id: u64 },
    msg_type::UNSUBSCRIBE_THREAD,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.thread_id);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { thread_id: r.get_u64()? })
    }
);

wire_message!(
    SubscribeChannel { channel_id: u64, subchannel_id: Option<u64> },
    msg_type::SUBSCRIBE_CHANNEL,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.channel_id);
        w.put_option(&self.subchannel_id, |w, v| w.put_u64(*v));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel_id: r.get_u64()?,
            subchannel_id: r.get_option(|r| r.get_u64())?,
        })
    }
);

wire_message!(
    UnsubscribeChannel { channel_id: u64, subchannel_id: Option<u64> },
    msg_type::UNSUBSCRIBE_CHANNEL,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.channel_id);
        w.put_option(&self.subchannel_id, |w, v| w.put_u64(*v));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel_id: r.get_u64()?,
            subchannel_id: r.get_option(|r| r.get_u64())?,
        })
    }
);

// ---------------------------------------------------------------------------
// Directory sub-protocol (§4.6) -- carried over both transports in either role
// ---------------------------------------------------------------------------

wire_message!(
    ListServers { limit: u16 },
    msg_type::LIST_SERVERS,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u16(self.limit);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { limit: r.get_u16()? })
    }
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub hostname: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub user_count: u32,
    pub max_users: u32,
    pub uptime_seconds: u64,
    pub channel_count: u32,
    pub is_public: bool,
}

impl ServerInfo {
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_str(&self.hostname);
        w.put_u16(self.port);
        w.put_str(&self.name);
        w.put_str(&self.description);
        w.put_u32(self.user_count);
        w.put_u32(self.max_users);
        w.put_u64(self.uptime_seconds);
        w.put_u32(self.channel_count);
        w.put_bool(self.is_public);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            hostname: r.get_str()?,
            port: r.get_u16()?,
            name: r.get_str()?,
            description: r.get_str()?,
            user_count: r.get_u32()?,
            max_users: r.get_u32()?,
            uptime_seconds: r.get_u64()?,
            channel_count: r.get_u32()?,
            is_public: r.get_bool()?,
        })
    }
}

wire_message!(
    ListServersResponse { servers: Vec<ServerInfo> },
    msg_type::LIST_SERVERS_RESPONSE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_vec(&self.servers, |w, s| s.encode(w));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { servers: r.get_vec(ServerInfo::decode)? })
    }
);

wire_message!(
    RegisterServer {
        hostname: String,
        port: u16,
        name: String,
        description: String,
        max_users: u32,
        is_public: bool
    },
    msg_type::REGISTER_SERVER,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_str(&self.hostname);
        w.put_u16(self.port);
        w.put_str(&self.name);
        w.put_str(&self.description);
        w.put_u32(self.max_users);
        w.put_bool(self.is_public);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            hostname: r.get_str()?,
            port: r.get_u16()?,
            name: r.get_str()?,
            description: r.get_str()?,
            max_users: r.get_u32()?,
            is_public: r.get_bool()?,
        })
    }
);

wire_message!(
    RegisterAck { success: bool, message: String },
    msg_type::REGISTER_ACK,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_bool(self.success);
        w.put_str(&self.message);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            success: r.get_bool()?,
            message: r.get_str()?,
        })
    }
);

wire_message!(
    VerifyRegistration { challenge: u64 },
    msg_type::VERIFY_REGISTRATION,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.challenge);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { challenge: r.get_u64()? })
    }
);

wire_message!(
    VerifyResponse { challenge: u64 },
    msg_type::VERIFY_RESPONSE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.challenge);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { challenge: r.get_u64()? })
    }
);

wire_message!(
    Heartbeat {
        user_count: u32,
        max_users: u32,
        uptime_seconds: u64,
        channel_count: u32
    },
    msg_type::HEARTBEAT,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u32(self.user_count);
        w.put_u32(self.max_users);
        w.put_u64(self.uptime_seconds);
        w.put_u32(self.channel_count);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            user_count: r.get_u32()?,
            max_users: r.get_u32()?,
            uptime_seconds: r.get_u64()?,
            channel_count: r.get_u32()?,
        })
    }
);

wire_message!(
    HeartbeatAck { interval_secs: u32 },
    msg_type::HEARTBEAT_ACK,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u32(self.interval_secs);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { interval_secs: r.get_u32()? })
    }
);

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

wire_message!(
    NicknameResponse { success: bool, message: String },
    msg_type::NICKNAME_RESPONSE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_bool(self.success);
        w.put_str(&self.message);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            success: r.get_bool()?,
            message: r.get_str()?,
        })
    }
);

wire_message!(
    ErrorMsg { code: u16, message: String },
    msg_type::ERROR,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u16(self.code);
        w.put_str(&self.message);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            code: r.get_u16()?,
            message: r.get_str()?,
        })
    }
);

wire_message!(
    ChannelList { channels: Vec<ChannelInfo> },
    msg_type::CHANNEL_LIST,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_vec(&self.channels, |w, c| c.encode(w));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { channels: r.get_vec(ChannelInfo::decode)? })
    }
);

wire_message!(
    JoinResponse { success: bool, message: String, channel_id: u64 },
    msg_type::JOIN_RESPONSE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_bool(self.success);
        w.put_str(&self.message);
        w.put_u64(self.channel_id);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            success: r.get_bool()?,
            message: r.get_str()?,
            channel_id: r.get_u64()?,
        })
    }
);

wire_message!(
    LeaveResponse { success: bool, message: String },
    msg_type::LEAVE_RESPONSE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_bool(self.success);
        w.put_str(&self.message);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            success: r.get_bool()?,
            message: r.get_str()?,
        })
    }
);

wire_message!(
    MessageList { messages: Vec<MessageInfo> },
    msg_type::MESSAGE_LIST,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_vec(&self.messages, |w, m| m.encode(w));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { messages: r.get_vec(MessageInfo::decode)? })
    }
);

wire_message!(
    MessagePosted { success: bool, message_id: u64, error: Option<String> },
    msg_type::MESSAGE_POSTED,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_bool(self.success);
        w.put_u64(self.message_id);
        w.put_option(&self.error, |w, v| w.put_str(v));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            success: r.get_bool()?,
            message_id: r.get_u64()?,
            error: r.get_option(|r| r.get_str())?,
        })
    }
);

wire_message!(
    NewMessage { message: MessageInfo },
    msg_type::NEW_MESSAGE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        self.message.encode(w);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { message: MessageInfo::decode(r)? })
    }
);

wire_message!(
    MessageDeleted { message_id: u64, channel_id: u64 },
    msg_type::MESSAGE_DELETED,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.message_id);
        w.put_u64(self.channel_id);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            message_id: r.get_u64()?,
            channel_id: r.get_u64()?,
        })
    }
);

wire_message!(
    EditResponse { success: bool, message_id: u64, error: Option<String> },
    msg_type::EDIT_RESPONSE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_bool(self.success);
        w.put_u64(self.message_id);
        w.put_option(&self.error, |w, v| w.put_str(v));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            success: r.get_bool()?,
            message_id: r.get_u64()?,
            error: r.get_option(|r| r.get_str())?,
        })
    }
);

wire_message!(
    ServerConfig {
        max_message_length: u32,
        max_nickname_length: u32,
        server_name: String,
        motd: String
    },
    msg_type::SERVER_CONFIG,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u32(self.max_message_length);
        w.put_u32(self.max_nickname_length);
        w.put_str(&self.server_name);
        w.put_str(&self.motd);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            max_message_length: r.get_u32()?,
            max_nickname_length: r.get_u32()?,
            server_name: r.get_str()?,
            motd: r.get_str()?,
        })
    }
);

wire_message!(
    SubscribeOk { channel_id: Option<u64>, thread_id: Option<u64> },
    msg_type::SUBSCRIBE_OK,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_option(&self.channel_id, |w, v| w.put_u64(*v));
        w.put_option(&self.thread_id, |w, v| w.put_u64(*v));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel_id: r.get_option(|r| r.get_u64())?,
            thread_id: r.get_option(|r| r.get_u64())?,
        })
    }
);

wire_message!(
    AuthResponse { success: bool, message: String, user_id: Option<u64> },
    msg_type::AUTH_RESPONSE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_bool(self.success);
        w.put_str(&self.message);
        w.put_option(&self.user_id, |w, v| w.put_u64(*v));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            success: r.get_bool()?,
            message: r.get_str()?,
            user_id: r.get_option(|r| r.get_u64())?,
        })
    }
);

wire_message!(
    RegisterResponse { success: bool, message: String, user_id: Option<u64> },
    msg_type::REGISTER_RESPONSE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_bool(self.success);
        w.put_str(&self.message);
        w.put_option(&self.user_id, |w, v| w.put_u64(*v));
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            success: r.get_bool()?,
            message: r.get_str()?,
            user_id: r.get_option(|r| r.get_u64())?,
        })
    }
);

wire_message!(
    ChannelPresence { channel_id: u64, online_count: u32 },
    msg_type::CHANNEL_PRESENCE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u64(self.channel_id);
        w.put_u32(self.online_count);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel_id: r.get_u64()?,
            online_count: r.get_u32()?,
        })
    }
);

wire_message!(
    ServerPresence { online_count: u32 },
    msg_type::SERVER_PRESENCE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_u32(self.online_count);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { online_count: r.get_u32()? })
    }
);

wire_message!(
    AdminResponse { success: bool, message: String },
    msg_type::ADMIN_RESPONSE,
    fn encode(&self, w: &mut WireWriter<'_>) {
        w.put_bool(self.success);
        w.put_str(&self.message);
    },
    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            success: r.get_bool()?,
            message: r.get_str()?,
        })
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_post_message_through_a_frame() {
        let msg = PostMessage {
            channel_id: 7,
            subchannel_id: None,
            parent_id: Some(3),
            content: "hello".to_owned(),
        };
        let frame = encode_message(&msg);
        assert_eq!(frame.msg_type, msg_type::POST_MESSAGE);
        let decoded: PostMessage = decode_message(&frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_new_message_with_full_message_info() {
        let msg = NewMessage {
            message: MessageInfo {
                id: 42,
                channel_id: 1,
                subchannel_id: None,
                parent_id: None,
                thread_root_id: None,
                author_user_id: Some(9),
                author_nickname: "alice".to_owned(),
                content: "hi".to_owned(),
                created_at: 1_700_000_000_000,
                edited_at: None,
                deleted_at: None,
            },
        };
        let frame = encode_message(&msg);
        let decoded: NewMessage = decode_message(&frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_message_rejects_mismatched_frame_type() {
        let frame = encode_message(&Ping {});
        let err = decode_message::<PostMessage>(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::KindMismatch(_, _)));
    }

    #[test]
    fn round_trips_channel_list_and_server_list() {
        let channels = ChannelList {
            channels: vec![ChannelInfo {
                id: 1,
                name: "general".to_owned(),
                display_name: "General".to_owned(),
                description: Some("default channel".to_owned()),
                channel_type: ChannelType::Chat,
                retention_hours: 24,
                is_private: false,
                user_count: 3,
            }],
        };
        let frame = encode_message(&channels);
        let decoded: ChannelList = decode_message(&frame).unwrap();
        assert_eq!(decoded, channels);

        let servers = ListServersResponse {
            servers: vec![ServerInfo {
                hostname: "chat.example.com".to_owned(),
                port: 6666,
                name: "Example".to_owned(),
                description: "desc".to_owned(),
                user_count: 10,
                max_users: 100,
                uptime_seconds: 3600,
                channel_count: 5,
                is_public: true,
            }],
        };
        let frame = encode_message(&servers);
        let decoded: ListServersResponse = decode_message(&frame).unwrap();
        assert_eq!(decoded, servers);
    }
}
