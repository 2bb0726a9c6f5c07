/// A town found on the world map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Town {
    pub owner_user_id: String,
}
