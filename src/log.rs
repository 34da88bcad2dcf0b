#[macro_export]
macro_rules! info {
    ($mailbox:expr,  $msg:expr) => {
        info!($mailbox, $msg,)
    };
    ($mailbox:expr, $msg:expr, $($args:expr),* $(,)?) => {
        let formatted = format!($msg, $($args),*);
        emit_event!($mailbox, $crate::Event::Info(formatted));
    };
}

#[macro_export]
macro_rules! warn {
    ($mailbox:expr, $msg:expr) => {
        warn!($mailbox, $msg,)
    };
    ($mailbox:expr, $msg:expr, $($args:expr),* $(,)?) => {
        let formatted = format!($msg, $($args),*);
        emit_event!($mailbox, $crate::Event::Warning(formatted));
    };
}

#[macro_export]
macro_rules! error {
    ($mailbox:expr, $msg:expr) => {
        error!($mailbox, $msg,)
    };
    ($mailbox:expr, $msg:expr, $($args:expr),* $(,)?) => {
        let formatted = format!($msg, $($args),*);
        emit_event!($mailbox, $crate::Event::Error(formatted));
    };
}

#[macro_export]
macro_rules! emit_event {
    ($mailbox:expr, $event:expr) => {
        $mailbox.call_cb($event)
    };
}
