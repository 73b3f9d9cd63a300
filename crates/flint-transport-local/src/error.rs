use flint_core::error::{CoreError, codes};

/// 操作名常量：错误消息与日志的统一归属标签。
pub(crate) const REGISTER: &str = "register";
pub(crate) const BIND: &str = "bind";
pub(crate) const CONNECT: &str = "connect";
pub(crate) const WRITE: &str = "write";

/// 通道尚未注册事件循环。
pub(crate) fn not_registered(op: &'static str) -> CoreError {
    CoreError::new(
        codes::NOT_YET_CONNECTED,
        format!("{op}: 通道尚未注册事件循环"),
    )
}

/// 本地传输只接受命名/临时地址。
pub(crate) fn unsupported_address(op: &'static str) -> CoreError {
    CoreError::new(
        codes::UNSUPPORTED_ADDRESS,
        format!("{op}: 本地传输不接受该地址变体"),
    )
}

/// 监听通道不具备的操作。
pub(crate) fn server_unsupported(op: &'static str) -> CoreError {
    CoreError::new(codes::APP_INVALID_ARGUMENT, format!("{op}: 监听通道不支持该操作"))
}
