use strum::{EnumString, IntoStaticStr, AsRefStr};
use serde::{Serialize, Deserialize};

/// Роль автора сообщения в удалённом контексте беседы
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Сообщение пользователя
    User,
    /// Ответ модели
    Model,
}

/// Способ постепенного показа ответа в чате
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumString, IntoStaticStr, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Ответ целиком, затем посимвольная "печать" с задержкой
    #[default]
    Simulated,
    /// Потоковый ответ транспорта, куски показываются по мере прихода
    Transport,
}

impl ChatRole {
    /// Получает строковое представление роли
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Создает ChatRole из строки
    pub fn from_str(s: &str) -> Result<Self, strum::ParseError> {
        s.parse()
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn from_str(s: &str) -> Result<Self, strum::ParseError> {
        s.parse()
    }
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
