/// Application name
pub const APP_NAME: &str = "Super Yap";

/// Top-level store roots
pub const USERS_ROOT: &str = "users";
pub const CHATS_ROOT: &str = "chats";

/// Per-user sub-collections
pub const CONTACTS_SEGMENT: &str = "contacts";
pub const CONVERSATIONS_SEGMENT: &str = "conversations";

/// Record fields addressed directly by the sync layer
pub const PINNED_FIELD: &str = "pinned";
pub const REACTIONS_FIELD: &str = "reactions";
pub const ID_FIELD: &str = "id";

/// Joins the two sorted participant ids of a conversation
pub const CONVERSATION_SEPARATOR: char = '_';

/// Product-wide obfuscation key. Every participant must use the same one.
pub const DEFAULT_OBFUSCATION_KEY: &str = "SUPER_YAP_GLOBAL_CONSTANT_KEY_2024";

/// Shown in place of a payload that cannot be de-obfuscated
pub const DECODE_PLACEHOLDER: &str = "[Encrypted Message]";

/// Preview text for sticker messages
pub const STICKER_PREVIEW: &str = "Sent a sticker";

/// Tagged payload prefixes, never obfuscated
pub const EMOJI_MARKER_PREFIX: &str = "EMOJI:";
pub const STICKER_MARKER_PREFIX: &str = "STICKER:";

/// Number of stickers in the picker (indices are 1-based)
pub const STICKER_COUNT: u32 = 40;

/// Key material prefixes
pub const SHARED_KEY_PREFIX: &str = "shared_hash_";
pub const MASTER_KEY_PREFIX: &str = "master_key_";
pub const MASTER_KEY_SUFFIX_LEN: usize = 7;

/// Avatar defaults
pub const DEFAULT_AVATAR: &str = "robohash";
pub const AVATAR_SERVICE_URL: &str = "https://robohash.org/k";

/// Query parameter carrying a deep-link target
pub const DEEP_LINK_PARAM: &str = "user";

/// Characters of the contact id shown when there is no preview yet
pub const PREVIEW_ID_CHARS: usize = 16;

/// Length of a generated local address in bytes (`0x` + 40 hex chars)
pub const ADDRESS_BYTES: usize = 20;
