//! Pivot descriptors
//!
//! A pivot is the table whose `modified` column drives one pipeline. Changed
//! pivot ids are mapped to film-work ids through a fixed chain of join hops:
//!
//! | pivot       | hops                                                   |
//! |-------------|--------------------------------------------------------|
//! | `film_work` | none                                                   |
//! | `person`    | person → person_film_work → film_work                  |
//! | `genre`     | genre → genre_film_work, then → existing film_work ids |

/// Catalogue table carrying a `modified` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTable {
    FilmWork,
    Person,
    Genre,
}

impl SourceTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTable::FilmWork => "film_work",
            SourceTable::Person => "person",
            SourceTable::Genre => "genre",
        }
    }
}

impl std::fmt::Display for SourceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One id → id resolution step, always `DISTINCT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinHop {
    /// person ids → ids of film works crediting them
    PersonFilmWorks,
    /// genre ids → film-work ids referenced by `genre_film_work`
    GenreLinks,
    /// film-work ids → the subset that exists in `film_work`
    ExistingFilmWorks,
}

impl JoinHop {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinHop::PersonFilmWorks => "person→film_work",
            JoinHop::GenreLinks => "genre→genre_film_work",
            JoinHop::ExistingFilmWorks => "genre_film_work→film_work",
        }
    }
}

/// Static description of one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PivotConfig {
    pub name: &'static str,
    pub table: SourceTable,
    pub hops: &'static [JoinHop],
    pub watermark_key: &'static str,
}

impl PivotConfig {
    pub const FILM_WORK: PivotConfig = PivotConfig {
        name: "film_work",
        table: SourceTable::FilmWork,
        hops: &[],
        watermark_key: "last_film_work_modified",
    };

    pub const PERSON: PivotConfig = PivotConfig {
        name: "person",
        table: SourceTable::Person,
        hops: &[JoinHop::PersonFilmWorks],
        watermark_key: "last_person_modified",
    };

    pub const GENRE: PivotConfig = PivotConfig {
        name: "genre",
        table: SourceTable::Genre,
        hops: &[JoinHop::GenreLinks, JoinHop::ExistingFilmWorks],
        watermark_key: "last_genre_modified",
    };

    /// Pivots in the order one sync cycle runs them
    pub fn all() -> [PivotConfig; 3] {
        [Self::FILM_WORK, Self::PERSON, Self::GENRE]
    }

    /// Column whose maximum becomes an aggregate's relevance timestamp
    pub fn relevance(&self) -> SourceTable {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_counts() {
        assert_eq!(PivotConfig::FILM_WORK.hops.len(), 0);
        assert_eq!(PivotConfig::PERSON.hops.len(), 1);
        assert_eq!(PivotConfig::GENRE.hops.len(), 2);
    }

    #[test]
    fn test_watermark_keys_are_distinct() {
        let keys: std::collections::HashSet<_> =
            PivotConfig::all().iter().map(|p| p.watermark_key).collect();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_cycle_order() {
        let names: Vec<_> = PivotConfig::all().iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["film_work", "person", "genre"]);
    }
}
