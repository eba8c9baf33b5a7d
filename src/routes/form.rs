use axum::{
    body::Bytes,
    extract::multipart::{Multipart, MultipartError},
};
use std::collections::HashMap;

/// Fully buffered multipart form. When a field name repeats, the first
/// occurrence wins.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, Bytes>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, MultipartError> {
        let mut fields = HashMap::new();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            let data = field.bytes().await?;
            fields.entry(name).or_insert(data);
        }
        Ok(Self { fields })
    }

    pub fn take(&mut self, name: &str) -> Option<Bytes> {
        self.fields.remove(name)
    }

    pub fn take_text(&mut self, name: &str) -> Option<String> {
        self.take(name)
            .map(|data| String::from_utf8_lossy(&data).into_owned())
    }
}
