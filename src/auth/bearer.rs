use crate::request::HeaderList;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerAuth {
    pub token: String,
}

impl BearerAuth {
    pub fn apply(&self, headers: &mut HeaderList) {
        headers.set("Authorization", format!("Bearer {}", self.token));
    }
}
