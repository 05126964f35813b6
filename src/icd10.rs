//! ICD-10 diagnosis categories, as recorded in the claims extracts.

mod codeset;
pub use codeset::{CodePattern, CodeSet, CodeSetMatcher};

use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    str::{self, FromStr},
};

/// A 3-character ICD-10 category, e.g. `O80`.
///
/// Diagnoses in the extracts can be more specific (`O80.1`, `o801`), but all grouping is done at
/// the category level, so we only keep the first three characters.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct IcdCode([u8; 3]);

impl IcdCode {
    pub fn from_bytes(v: &[u8]) -> Result<Self> {
        ensure!(
            v.len() == 3,
            "expected a 3 character ICD-10 category, found {} characters",
            v.len()
        );
        ensure!(
            v[0].is_ascii_uppercase(),
            "ICD-10 categories start with a letter [A-Z]"
        );
        ensure!(
            v[1].is_ascii_digit() && v[2].is_ascii_digit(),
            "ICD-10 categories end with 2 digits"
        );
        Ok(IcdCode([v[0], v[1], v[2]]))
    }

    pub fn from_str(v: &str) -> Result<Self> {
        Self::from_bytes(v.as_bytes())
    }

    /// Turn a raw diagnosis field into a category.
    ///
    /// The field is trimmed, upper-cased and cut down to its first 3 characters. `None` if what is
    /// left isn't a valid category.
    pub fn normalize(raw: &str) -> Option<Self> {
        let mut buf = [0u8; 3];
        let mut len = 0;
        for b in raw.trim().bytes().take(3) {
            buf[len] = b.to_ascii_uppercase();
            len += 1;
        }
        Self::from_bytes(&buf[..len]).ok()
    }

    pub fn chapter(self) -> char {
        char::from(self.0[0])
    }

    pub fn number(self) -> u8 {
        (self.0[1] - b'0') * 10 + (self.0[2] - b'0')
    }

    /// All categories from `from` to `to` inclusive. Both must share a letter.
    pub fn range(from: IcdCode, to: IcdCode) -> Result<impl Iterator<Item = IcdCode>> {
        ensure!(
            from.chapter() == to.chapter(),
            "code ranges can't cross chapters ({} - {})",
            from,
            to
        );
        ensure!(from <= to, "code ranges must go from low to high ({} - {})", from, to);
        let letter = from.0[0];
        Ok((from.number()..=to.number()).map(move |n| IcdCode([letter, b'0' + n / 10, b'0' + n % 10])))
    }

    pub fn as_str(&self) -> &str {
        str::from_utf8(&self.0).expect("ICD-10 codes are ascii")
    }
}

impl fmt::Debug for IcdCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for IcdCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl<'a> TryFrom<&'a str> for IcdCode {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::from_str(s)
    }
}

impl FromStr for IcdCode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}

impl AsRef<str> for IcdCode {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<[u8]> for IcdCode {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for IcdCode {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if s.is_human_readable() {
            s.serialize_str(self.as_str())
        } else {
            s.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for IcdCode {
    fn deserialize<D>(deserializer: D) -> Result<IcdCode, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(IcdCodeVisitor)
        } else {
            deserializer.deserialize_bytes(IcdCodeVisitor)
        }
    }
}

struct IcdCodeVisitor;

impl<'de> serde::de::Visitor<'de> for IcdCodeVisitor {
    type Value = IcdCode;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an ICD-10 category (either as a byte array or a string)")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        IcdCode::from_str(v).map_err(serde::de::Error::custom)
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        IcdCode::from_bytes(v).map_err(serde::de::Error::custom)
    }
}
