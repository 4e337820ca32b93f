use serde::{Deserialize, Serialize};
use std::fmt;

/// A finite, enumerated task label drawn from the set known to the
/// Handler Registry. Unknown names are rejected at deserialization,
/// which is how malformed metadata naturally surfaces as
/// `InvalidTaskMetadata` rather than as a separate validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    CloneVfolder,
    DeleteVfolder,
    PushImage,
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskName::CloneVfolder => "clone_vfolder",
            TaskName::DeleteVfolder => "delete_vfolder",
            TaskName::PushImage => "push_image",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_in_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskName::CloneVfolder).unwrap(),
            "\"clone_vfolder\""
        );
    }

    #[test]
    fn unknown_name_fails_to_deserialize() {
        let result: Result<TaskName, _> = serde_json::from_str("\"rename_vfolder\"");
        assert!(result.is_err());
    }
}
