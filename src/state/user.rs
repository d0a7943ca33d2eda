/// A registered tracker account, keyed by its 32-character passkey.
#[derive(Clone, Debug)]
pub struct User {
    pub id: u32,
    pub can_leech: bool,
    /// Personal freeleech expiry (Unix seconds); 0 means never granted.
    pub personal_freeleech_until: i64,
    pub permission_id: i32,
}
