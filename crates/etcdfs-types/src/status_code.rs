/// Numeric status code carried by [`crate::Status`].
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const INVALID_ARG: status_code_t = 3;
    pub const READ_ONLY_MODE: status_code_t = 34;
    pub const FILE_TOO_LARGE: status_code_t = 35;
}

/// Key-value store status codes (1xxx).
pub mod KvCode {
    use super::status_code_t;

    pub const GET_ERROR: status_code_t = 1000;
    pub const PUT_ERROR: status_code_t = 1001;
    pub const DELETE_ERROR: status_code_t = 1002;
    pub const SCAN_ERROR: status_code_t = 1003;
    pub const TLS_CONFIG_ERROR: status_code_t = 1005;
}

/// RPC status codes (2xxx).
pub mod RPCCode {
    use super::status_code_t;

    pub const TIMEOUT: status_code_t = 2005;
    pub const CONNECT_FAILED: status_code_t = 2014;
}

/// Namespace status codes (3xxx).
pub mod MetaCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const NOT_DIRECTORY: status_code_t = 3003;
    pub const IS_DIRECTORY: status_code_t = 3006;
}

/// Convert a status code to its human-readable name.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::READ_ONLY_MODE => "ReadOnlyMode",
        StatusCode::FILE_TOO_LARGE => "FileTooLarge",

        KvCode::GET_ERROR => "Kv::GetError",
        KvCode::PUT_ERROR => "Kv::PutError",
        KvCode::DELETE_ERROR => "Kv::DeleteError",
        KvCode::SCAN_ERROR => "Kv::ScanError",
        KvCode::TLS_CONFIG_ERROR => "Kv::TlsConfigError",

        RPCCode::TIMEOUT => "RPC::Timeout",
        RPCCode::CONNECT_FAILED => "RPC::ConnectFailed",

        MetaCode::NOT_FOUND => "Meta::NotFound",
        MetaCode::NOT_DIRECTORY => "Meta::NotDirectory",
        MetaCode::IS_DIRECTORY => "Meta::IsDirectory",

        _ => "UnknownStatusCode",
    }
}

/// Map a status code to the errno reported through the filesystem protocol.
///
/// Anything that is not a namespace or argument error, store failures and
/// timeouts included, is reported as `EIO`.
pub fn to_errno(code: status_code_t) -> i32 {
    match code {
        StatusCode::INVALID_ARG => libc::EINVAL,
        StatusCode::READ_ONLY_MODE => libc::EROFS,
        StatusCode::FILE_TOO_LARGE => libc::EFBIG,

        MetaCode::NOT_FOUND => libc::ENOENT,
        MetaCode::NOT_DIRECTORY => libc::ENOTDIR,
        MetaCode::IS_DIRECTORY => libc::EISDIR,

        _ => libc::EIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string() {
        assert_eq!(to_string(StatusCode::OK), "OK");
        assert_eq!(to_string(KvCode::PUT_ERROR), "Kv::PutError");
        assert_eq!(to_string(RPCCode::TIMEOUT), "RPC::Timeout");
        assert_eq!(to_string(MetaCode::NOT_FOUND), "Meta::NotFound");
        assert_eq!(to_string(12345), "UnknownStatusCode");
    }

    #[test]
    fn test_to_errno() {
        assert_eq!(to_errno(MetaCode::NOT_FOUND), libc::ENOENT);
        assert_eq!(to_errno(MetaCode::IS_DIRECTORY), libc::EISDIR);
        assert_eq!(to_errno(MetaCode::NOT_DIRECTORY), libc::ENOTDIR);
        assert_eq!(to_errno(StatusCode::READ_ONLY_MODE), libc::EROFS);
        assert_eq!(to_errno(StatusCode::FILE_TOO_LARGE), libc::EFBIG);
        assert_eq!(to_errno(StatusCode::INVALID_ARG), libc::EINVAL);
    }

    #[test]
    fn test_store_failures_map_to_eio() {
        for code in [
            KvCode::GET_ERROR,
            KvCode::PUT_ERROR,
            KvCode::DELETE_ERROR,
            KvCode::SCAN_ERROR,
            RPCCode::TIMEOUT,
            RPCCode::CONNECT_FAILED,
        ] {
            assert_eq!(to_errno(code), libc::EIO, "code {}", to_string(code));
        }
    }
}
