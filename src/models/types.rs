use serde::{Serialize, Deserialize};
use derive_more::{From, Into, Display, AsRef, FromStr};
use bon::Builder;

/// Идентификатор чат-сессии (одно подключение браузера)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into, Display, AsRef, FromStr)]
#[from(String, &str)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random (UUID v4) session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Описание гриба, полученное от модели по фотографии.
/// Пустая строка означает "описание недоступно", а не ошибку.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, From, Into, Display, AsRef, FromStr)]
#[from(String, &str)]
pub struct MushroomDescription(String);

impl MushroomDescription {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One exchange of the visible transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct Turn {
    #[builder(into)]
    pub question: String,
    #[builder(into)]
    pub answer: String,
}

/// Raw upload from the image box.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
}

impl UploadedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Запрос пользователя, ожидающий обработки: текст и, возможно, картинка
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct PendingTurn {
    #[builder(into, default)]
    pub question: String,
    pub image: Option<UploadedImage>,
}

impl PendingTurn {
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id() {
        let id = SessionId::from("abc-123");
        assert_eq!(id.as_str(), "abc-123");
        assert_eq!(id.to_string(), "abc-123");

        let id_from_str: SessionId = "abc-123".parse().unwrap();
        assert_eq!(id_from_str, id);
    }

    #[test]
    fn test_generated_session_ids_differ() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_description_types() {
        let d = MushroomDescription::from("{\"genus\": \"Boletus\"}");
        assert!(!d.is_empty());
        assert_eq!(d.to_string(), "{\"genus\": \"Boletus\"}");
        assert!(MushroomDescription::empty().is_empty());
    }

    #[test]
    fn test_pending_turn_builder() {
        let turn = PendingTurn::builder().question("what is this?").build();
        assert_eq!(turn.question, "what is this?");
        assert!(!turn.has_image());

        let with_image = PendingTurn::builder()
            .image(UploadedImage::builder().bytes(vec![1, 2, 3]).build())
            .build();
        assert!(with_image.question.is_empty());
        assert!(with_image.has_image());
    }
}
