//! Status helper enums mapping to SMALLSERIAL/SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order
//! (1-based) in the corresponding `*_statuses` / `job_steps` table.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant from its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Video lifecycle status.
    VideoStatus {
        Uploaded = 1,
        Processing = 2,
        Ready = 3,
        Failed = 4,
        Deleted = 5,
    }
}

define_status_enum! {
    /// Transcoding job execution status.
    JobStatus {
        Pending = 1,
        Running = 2,
        Completed = 3,
        Failed = 4,
        Cancelled = 5,
    }
}

define_status_enum! {
    /// Pipeline step the job has reached. Strictly ordered; a crash
    /// after checkpointing step N resumes at N+1.
    JobStep {
        Probe = 1,
        Thumbnail = 2,
        Transcode = 3,
        MasterPlaylist = 4,
        Finalize = 5,
        Done = 6,
    }
}

define_status_enum! {
    /// Per-quality transcode status.
    QualityStatus {
        Pending = 1,
        InProgress = 2,
        Completed = 3,
        Failed = 4,
        Skipped = 5,
    }
}

define_status_enum! {
    /// Worker node availability status.
    WorkerStatus {
        Active = 1,
        Offline = 2,
        Disabled = 3,
    }
}

impl QualityStatus {
    /// Terminal for the current attempt: no executor run needed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_ids_match_seed_data() {
        assert_eq!(JobStatus::Pending.id(), 1);
        assert_eq!(JobStatus::Running.id(), 2);
        assert_eq!(JobStatus::Completed.id(), 3);
        assert_eq!(JobStatus::Failed.id(), 4);
        assert_eq!(JobStatus::Cancelled.id(), 5);
    }

    #[test]
    fn job_step_ids_follow_pipeline_order() {
        assert_eq!(JobStep::Probe.id(), 1);
        assert_eq!(JobStep::Thumbnail.id(), 2);
        assert_eq!(JobStep::Transcode.id(), 3);
        assert_eq!(JobStep::MasterPlaylist.id(), 4);
        assert_eq!(JobStep::Finalize.id(), 5);
        assert_eq!(JobStep::Done.id(), 6);
    }

    #[test]
    fn from_id_round_trips() {
        assert_eq!(QualityStatus::from_id(3), Some(QualityStatus::Completed));
        assert_eq!(QualityStatus::from_id(99), None);
        assert_eq!(JobStep::from_id(JobStep::Transcode.id()), Some(JobStep::Transcode));
    }

    #[test]
    fn quality_terminal_states() {
        assert!(QualityStatus::Completed.is_terminal());
        assert!(QualityStatus::Failed.is_terminal());
        assert!(QualityStatus::Skipped.is_terminal());
        assert!(!QualityStatus::Pending.is_terminal());
        assert!(!QualityStatus::InProgress.is_terminal());
    }

    #[test]
    fn status_into_status_id() {
        let id: StatusId = WorkerStatus::Offline.into();
        assert_eq!(id, 2);
    }
}
