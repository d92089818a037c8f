//! Error code constants

/// Service client error codes (1000-1099)
pub const ERR_TRANSPORT: &str = "E-EMU-1001";
pub const ERR_SERVICE: &str = "E-EMU-1002";
pub const ERR_DECODE: &str = "E-EMU-1003";

/// Session error codes (2000-2099)
pub const ERR_LOGICAL_FAILURE: &str = "E-EMU-2001";
pub const ERR_SESSION_CLOSED: &str = "E-EMU-2002";

/// CLI error codes (3000-3099)
pub const ERR_CLI_USAGE: &str = "E-EMU-3001";
