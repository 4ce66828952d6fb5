//! Local disk storage for uploads and annotated videos.
//!
//! Layout under the data root:
//! - `uploads/<job_id>_<sanitized name>`: the file as uploaded
//! - `outputs/<job_id>_pose.mp4`: the annotated result

pub mod error;
pub mod local;
pub mod naming;

pub use error::{StorageError, StorageResult};
pub use local::{LocalStorage, StoredUpload};
pub use naming::sanitize_filename;
