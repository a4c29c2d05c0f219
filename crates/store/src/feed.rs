/// Notification pushed after a write commits. Subscribers that fall behind
/// miss events; they are expected to re-read, not replay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Set,
    Updated,
    Deleted,
}
