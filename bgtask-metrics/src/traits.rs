use bgtask_types::{ErrorCode, Status, TaskName};

/// Renders a value as a Prometheus label, the way the teacher's metrics
/// crate labels proof types and request types.
pub trait ToLabel {
    fn to_label(&self) -> String;
}

impl ToLabel for &'static str {
    fn to_label(&self) -> String {
        self.to_string()
    }
}

impl ToLabel for TaskName {
    fn to_label(&self) -> String {
        self.to_string()
    }
}

impl ToLabel for Status {
    fn to_label(&self) -> String {
        self.to_string()
    }
}

impl ToLabel for Option<ErrorCode> {
    fn to_label(&self) -> String {
        match self {
            Some(code) => code.to_string(),
            None => "none".to_string(),
        }
    }
}
