use serde::{Deserialize, Serialize};

/// Oxford-IIIT Pet breeds in the dataset's canonical class-id order.
/// Cat breeds are capitalized, dog breeds are lowercase.
pub const OXFORD_PET_BREEDS: [&str; 37] = [
    "Abyssinian",
    "american_bulldog",
    "american_pit_bull_terrier",
    "basset_hound",
    "beagle",
    "Bengal",
    "Birman",
    "Bombay",
    "boxer",
    "British_Shorthair",
    "chihuahua",
    "Egyptian_Mau",
    "english_cocker_spaniel",
    "english_setter",
    "german_shorthaired",
    "great_pyrenees",
    "havanese",
    "japanese_chin",
    "keeshond",
    "leonberger",
    "Maine_Coon",
    "miniature_pinscher",
    "newfoundland",
    "Persian",
    "pomeranian",
    "pug",
    "Ragdoll",
    "Russian_Blue",
    "saint_bernard",
    "samoyed",
    "scottish_terrier",
    "shiba_inu",
    "Siamese",
    "Sphynx",
    "staffordshire_bull_terrier",
    "wheaten_terrier",
    "yorkshire_terrier",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    Cat,
    Dog,
}

impl Species {
    /// Oxford-IIIT naming convention: a leading uppercase letter marks a cat breed.
    pub fn of_breed(name: &str) -> Self {
        match name.chars().next() {
            Some(c) if c.is_uppercase() => Species::Cat,
            _ => Species::Dog,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Cat => "cat",
            Species::Dog => "dog",
        }
    }
}

/// Bidirectional class id <-> breed name mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMap {
    names: Vec<String>,
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::oxford_pets()
    }
}

impl LabelMap {
    pub fn oxford_pets() -> Self {
        Self {
            names: OXFORD_PET_BREEDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Case-insensitive lookup; spaces and underscores are interchangeable.
    pub fn id_of(&self, name: &str) -> Option<usize> {
        let wanted = canonical(name);
        self.names.iter().position(|n| canonical(n) == wanted)
    }

    pub fn species(&self, id: usize) -> Option<Species> {
        self.name(id).map(Species::of_breed)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

fn canonical(name: &str) -> String {
    name.trim().replace(' ', "_").to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oxford_map_has_twelve_cat_breeds() {
        let map = LabelMap::oxford_pets();
        assert_eq!(map.len(), 37);
        let cats = (0..map.len())
            .filter(|&id| map.species(id) == Some(Species::Cat))
            .count();
        assert_eq!(cats, 12);
    }

    #[test]
    fn lookup_is_case_and_separator_insensitive() {
        let map = LabelMap::oxford_pets();
        assert_eq!(map.id_of("leonberger"), Some(19));
        assert_eq!(map.id_of("maine coon"), map.id_of("Maine_Coon"));
        assert_eq!(map.id_of("unicorn"), None);
        assert_eq!(map.name(0), Some("Abyssinian"));
    }
}
