use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cluster-assigned identity of a tenant, stable for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A tenant discovered on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantDescriptor {
    pub id: TenantId,
    /// Name as registered on the cluster.
    pub display_name: String,
    /// Identifier-safe name used to derive sink table, database and index names.
    pub database_name: String,
}

impl TenantDescriptor {
    /// Builds a descriptor, deriving the database name from the id and the display name.
    pub fn new(id: TenantId, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let database_name = database_name_for(id, &display_name);

        Self {
            id,
            display_name,
            database_name,
        }
    }
}

/// Longest name prefix kept in a database name.
const NAME_SLUG_LEN: usize = 16;

/// Derives the sink database name of a tenant: `<slug>_<id as 32 hex digits>`.
///
/// The slug is the lowercased name, transliterated from Cyrillic, with every character
/// outside `[a-z0-9_]` replaced by `_` and cut to 16 characters. The id suffix keeps names of
/// distinct tenants distinct whatever their display names are. The result is at most 49
/// characters long.
pub fn database_name_for(id: TenantId, name: &str) -> String {
    let mut slug = String::with_capacity(NAME_SLUG_LEN);
    for c in name.chars().flat_map(char::to_lowercase) {
        match c {
            'a'..='z' | '0'..='9' | '_' => slug.push(c),
            _ => match transliterate(c) {
                Some(latin) => slug.push_str(latin),
                None => slug.push('_'),
            },
        }
        if slug.len() >= NAME_SLUG_LEN {
            break;
        }
    }
    slug.truncate(NAME_SLUG_LEN);

    format!("{slug}_{}", id.as_uuid().simple())
}

fn transliterate(c: char) -> Option<&'static str> {
    let latin = match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' | 'ё' | 'э' => "e",
        'ж' => "zh",
        'з' => "z",
        'и' | 'й' => "i",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "sch",
        'ы' => "y",
        'ъ' | 'ь' => "",
        'ю' => "yu",
        'я' => "ya",
        _ => return None,
    };

    Some(latin)
}
