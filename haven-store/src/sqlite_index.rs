//! SQLite-based search index
//!
//! Single file with tables per resource type for performance.

use crate::error::Result;
use rusqlite::{params, Connection};
use std::path::Path;

/// SQLite-backed search index
pub struct SearchIndex {
    conn: Connection,
}

#[allow(clippy::result_large_err)]
impl SearchIndex {
    /// Open the index (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let index = Self { conn };
        index.initialize()?;
        Ok(index)
    }

    /// Initialize tables
    fn initialize(&self) -> Result<()> {
        // Generic search index table
        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS search_index (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                param_name TEXT NOT NULL,
                param_type TEXT NOT NULL,
                value_string TEXT,
                value_string_lower TEXT,
                value_system TEXT,
                value_date_start INTEGER,
                value_date_end INTEGER,
                value_number REAL,
                UNIQUE(resource_type, resource_id, param_name, value_string, value_system)
            )
            "#,
            [],
        )?;

        // Create indexes
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_type_param_string
             ON search_index(resource_type, param_name, value_string)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_type_param_token
             ON search_index(resource_type, param_name, value_system, value_string)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_type_param_date
             ON search_index(resource_type, param_name, value_date_start, value_date_end)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_resource
             ON search_index(resource_type, resource_id)",
            [],
        )?;

        Ok(())
    }

    /// Add an index entry
    pub fn add_index(
        &self,
        resource_type: &str,
        resource_id: &str,
        param_name: &str,
        param_type: &str,
        value_string: Option<&str>,
        value_system: Option<&str>,
    ) -> Result<()> {
        let value_string_lower = value_string.map(|s| s.to_lowercase());
        let value_number = if param_type == "quantity" || param_type == "number" {
            value_string.and_then(|s| s.parse::<f64>().ok())
        } else {
            None
        };

        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO search_index
            (resource_type, resource_id, param_name, param_type,
             value_string, value_string_lower, value_system, value_number)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                resource_type,
                resource_id,
                param_name,
                param_type,
                value_string,
                value_string_lower,
                value_system,
                value_number,
            ],
        )?;

        Ok(())
    }

    /// Remove all index entries for a resource
    pub fn remove_index(&self, resource_type: &str, resource_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM search_index WHERE resource_type = ?1 AND resource_id = ?2",
            params![resource_type, resource_id],
        )?;
        Ok(())
    }

    /// Token search (code, identifier, etc.)
    pub fn search_token(
        &self,
        resource_type: &str,
        param_name: &str,
        system: Option<&str>,
        code: &str,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::new();

        if let Some(sys) = system {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT DISTINCT resource_id FROM search_index
                WHERE resource_type = ?1
                  AND param_name = ?2
                  AND value_system = ?3
                  AND value_string = ?4
                "#,
            )?;
            let rows = stmt.query_map(params![resource_type, param_name, sys, code], |row| {
                row.get(0)
            })?;
            for row in rows {
                ids.push(row?);
            }
        } else {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT DISTINCT resource_id FROM search_index
                WHERE resource_type = ?1
                  AND param_name = ?2
                  AND value_string = ?3
                "#,
            )?;
            let rows = stmt.query_map(params![resource_type, param_name, code], |row| {
                row.get(0)
            })?;
            for row in rows {
                ids.push(row?);
            }
        }

        Ok(ids)
    }

    /// String search (name, etc., prefix match)
    pub fn search_string(
        &self,
        resource_type: &str,
        param_name: &str,
        value: &str,
        exact: bool,
    ) -> Result<Vec<String>> {
        let query = if exact {
            r#"
            SELECT DISTINCT resource_id FROM search_index
            WHERE resource_type = ?1
              AND param_name = ?2
              AND value_string_lower = ?3
            "#
        } else {
            r#"
            SELECT DISTINCT resource_id FROM search_index
            WHERE resource_type = ?1
              AND param_name = ?2
              AND value_string_lower LIKE ?3
            "#
        };

        let search_value = if exact {
            value.to_lowercase()
        } else {
            format!("{}%", value.to_lowercase())
        };

        let mut stmt = self.conn.prepare(query)?;
        let rows = stmt.query_map(params![resource_type, param_name, search_value], |row| {
            row.get(0)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }

        Ok(ids)
    }

    /// Reference search (subject, patient, etc.)
    pub fn search_reference(
        &self,
        resource_type: &str,
        param_name: &str,
        reference: &str,
    ) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT resource_id FROM search_index
            WHERE resource_type = ?1
              AND param_name = ?2
              AND value_string = ?3
              AND param_type = 'reference'
            "#,
        )?;
        let rows = stmt.query_map(params![resource_type, param_name, reference], |row| {
            row.get(0)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }

        Ok(ids)
    }

    /// Date search with the full FHIR R4 prefix set: eq, ne, gt, lt, ge, le,
    /// sa (starts after), eb (ends before), ap (approximately).
    ///
    /// Dates are stored as ISO 8601 text, which sorts lexicographically the
    /// same as chronologically for same-precision values, so plain string
    /// comparison operators are correct here.
    ///
    /// Choice-type date params (see `ExtractionMode::ChoiceDate`) index a
    /// Period as two rows tagged `value_system = 'period-start'`/`'period-end'`;
    /// plain scalar date params always have `value_system = NULL`. A
    /// lower-bound comparator (`ge`/`gt`/`sa`) only cares about where a period
    /// starts, and an upper-bound comparator (`le`/`lt`/`eb`) only cares where
    /// it ends, so those prefixes restrict to the matching tag (or a bare
    /// scalar row). `eq`/`ne`/`ap` make no tag distinction.
    pub fn search_date_with_prefix(
        &self,
        resource_type: &str,
        param_name: &str,
        prefix: &str,
        value: &str,
    ) -> Result<Vec<String>> {
        if prefix == "ap" {
            let day = value.split('T').next().unwrap_or(value);
            let like_pattern = format!("{}%", day);
            let mut stmt = self.conn.prepare(
                r#"
                SELECT DISTINCT resource_id FROM search_index
                WHERE resource_type = ?1 AND param_name = ?2 AND value_string LIKE ?3
                "#,
            )?;
            let rows = stmt.query_map(params![resource_type, param_name, like_pattern], |row| {
                row.get(0)
            })?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            return Ok(ids);
        }

        let tag_filter = match prefix {
            "ge" | "gt" | "sa" => "AND (value_system IS NULL OR value_system = 'period-start')",
            "le" | "lt" | "eb" => "AND (value_system IS NULL OR value_system = 'period-end')",
            _ => "",
        };

        let cmp = match prefix {
            "eq" => "=",
            "ne" => "!=",
            "ge" => ">=",
            "le" => "<=",
            "gt" | "sa" => ">",
            "lt" | "eb" => "<",
            _ => "=",
        };

        let query = format!(
            r#"
            SELECT DISTINCT resource_id FROM search_index
            WHERE resource_type = ?1 AND param_name = ?2 AND value_string {cmp} ?3
            {tag_filter}
            "#
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params![resource_type, param_name, value], |row| {
            row.get(0)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }

        Ok(ids)
    }

    /// Quantity search with a numeric prefix (eq, ne, gt, lt, ge, le) and an
    /// optional exact `system` (unit) term, per `value|system|code` search syntax.
    pub fn search_quantity_with_prefix(
        &self,
        resource_type: &str,
        param_name: &str,
        prefix: &str,
        value: f64,
        system: Option<&str>,
    ) -> Result<Vec<String>> {
        let cmp = match prefix {
            "ne" => "!=",
            "ge" => ">=",
            "le" => "<=",
            "gt" | "sa" => ">",
            "lt" | "eb" => "<",
            _ => "=",
        };
        let query = format!(
            "SELECT DISTINCT resource_id FROM search_index
             WHERE resource_type = ?1 AND param_name = ?2 AND value_number {cmp} ?3
             AND (?4 IS NULL OR value_system = ?4)"
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params![resource_type, param_name, value, system], |row| {
            row.get(0)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }

        Ok(ids)
    }

    /// URI search (exact match, e.g. `url`, `source`).
    pub fn search_uri(&self, resource_type: &str, param_name: &str, value: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT resource_id FROM search_index
            WHERE resource_type = ?1 AND param_name = ?2 AND value_string = ?3
            "#,
        )?;
        let rows = stmt.query_map(params![resource_type, param_name, value], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_search() {
        let index = SearchIndex::open(":memory:").unwrap();

        index
            .add_index(
                "Patient",
                "123",
                "identifier",
                "token",
                Some("12345678"),
                Some("urn:oid:1.2.392.100495.20.3.51"),
            )
            .unwrap();

        let results = index
            .search_token(
                "Patient",
                "identifier",
                Some("urn:oid:1.2.392.100495.20.3.51"),
                "12345678",
            )
            .unwrap();

        assert_eq!(results, vec!["123"]);
    }

    #[test]
    fn test_string_search() {
        let index = SearchIndex::open(":memory:").unwrap();

        index
            .add_index("Patient", "123", "family", "string", Some("Doe"), None)
            .unwrap();

        index
            .add_index("Patient", "456", "family", "string", Some("Donovan"), None)
            .unwrap();

        // Prefix match search
        let results = index
            .search_string("Patient", "family", "yama", false)
            .unwrap();

        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_reference_search() {
        let index = SearchIndex::open(":memory:").unwrap();

        index
            .add_index("Observation", "o1", "subject", "reference", Some("Patient/123"), None)
            .unwrap();

        let results = index
            .search_reference("Observation", "subject", "Patient/123")
            .unwrap();

        assert_eq!(results, vec!["o1"]);
    }

    #[test]
    fn test_date_search() {
        let index = SearchIndex::open(":memory:").unwrap();

        index
            .add_index("Patient", "p1", "birthdate", "date", Some("1990-01-01"), None)
            .unwrap();
        index
            .add_index("Patient", "p2", "birthdate", "date", Some("2000-06-15"), None)
            .unwrap();

        let results = index
            .search_date_with_prefix("Patient", "birthdate", "ge", "1995-01-01")
            .unwrap();

        assert_eq!(results, vec!["p2"]);
    }

    #[test]
    fn test_date_search_ne_sa_eb() {
        let index = SearchIndex::open(":memory:").unwrap();
        index
            .add_index("Patient", "p1", "birthdate", "date", Some("1990-01-01"), None)
            .unwrap();
        index
            .add_index("Patient", "p2", "birthdate", "date", Some("2000-06-15"), None)
            .unwrap();

        let ne = index
            .search_date_with_prefix("Patient", "birthdate", "ne", "1990-01-01")
            .unwrap();
        assert_eq!(ne, vec!["p2"]);

        let sa = index
            .search_date_with_prefix("Patient", "birthdate", "sa", "1995-01-01")
            .unwrap();
        assert_eq!(sa, vec!["p2"]);

        let eb = index
            .search_date_with_prefix("Patient", "birthdate", "eb", "1995-01-01")
            .unwrap();
        assert_eq!(eb, vec!["p1"]);
    }

    #[test]
    fn test_date_search_ap_matches_same_day() {
        let index = SearchIndex::open(":memory:").unwrap();
        index
            .add_index("Encounter", "e1", "date", "date", Some("2024-01-15T09:00:00Z"), None)
            .unwrap();
        index
            .add_index("Encounter", "e2", "date", "date", Some("2024-01-16T09:00:00Z"), None)
            .unwrap();

        let results = index
            .search_date_with_prefix("Encounter", "date", "ap", "2024-01-15")
            .unwrap();
        assert_eq!(results, vec!["e1"]);
    }

    #[test]
    fn test_quantity_search() {
        let index = SearchIndex::open(":memory:").unwrap();
        index
            .add_index("Observation", "o1", "value-quantity", "quantity", Some("5.4"), None)
            .unwrap();
        index
            .add_index("Observation", "o2", "value-quantity", "quantity", Some("9.1"), None)
            .unwrap();

        let results = index
            .search_quantity_with_prefix("Observation", "value-quantity", "gt", 6.0, None)
            .unwrap();
        assert_eq!(results, vec!["o2"]);

        let results = index
            .search_quantity_with_prefix("Observation", "value-quantity", "le", 5.4, None)
            .unwrap();
        assert_eq!(results, vec!["o1"]);
    }

    #[test]
    fn test_quantity_search_with_system() {
        let index = SearchIndex::open(":memory:").unwrap();
        index
            .add_index(
                "Observation", "o1", "value-quantity", "quantity", Some("37.2"),
                Some("http://unitsofmeasure.org"),
            )
            .unwrap();

        let results = index
            .search_quantity_with_prefix(
                "Observation", "value-quantity", "eq", 37.2, Some("http://unitsofmeasure.org"),
            )
            .unwrap();
        assert_eq!(results, vec!["o1"]);

        let empty = index
            .search_quantity_with_prefix(
                "Observation", "value-quantity", "eq", 37.2, Some("http://other.org"),
            )
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_date_search_prunes_to_period_start_for_lower_bound_prefix() {
        let index = SearchIndex::open(":memory:").unwrap();
        // Observation o1 has an effectiveDateTime; o2 has an effectivePeriod
        // spanning a range that starts before, but ends after, the query value.
        index
            .add_index("Observation", "o1", "date", "date", Some("2024-03-01"), None)
            .unwrap();
        index
            .add_index("Observation", "o2", "date", "date", Some("2024-01-01"), Some("period-start"))
            .unwrap();
        index
            .add_index("Observation", "o2", "date", "date", Some("2024-06-01"), Some("period-end"))
            .unwrap();

        // ge 2024-02-01: o1's scalar date qualifies; o2's period-start (2024-01-01)
        // does not, even though its period-end (2024-06-01) would lexically match -
        // the tag filter must keep the period-end row out of consideration.
        let results = index
            .search_date_with_prefix("Observation", "date", "ge", "2024-02-01")
            .unwrap();
        assert_eq!(results, vec!["o1"]);
    }

    #[test]
    fn test_date_search_prunes_to_period_end_for_upper_bound_prefix() {
        let index = SearchIndex::open(":memory:").unwrap();
        index
            .add_index("Observation", "o1", "date", "date", Some("2024-03-01"), None)
            .unwrap();
        index
            .add_index("Observation", "o2", "date", "date", Some("2024-01-01"), Some("period-start"))
            .unwrap();
        index
            .add_index("Observation", "o2", "date", "date", Some("2024-06-01"), Some("period-end"))
            .unwrap();

        // le 2024-02-01: neither o1's scalar (2024-03-01) nor o2's period-end
        // (2024-06-01) qualify; o2's period-start would lexically match but
        // must be excluded by the tag filter.
        let results = index
            .search_date_with_prefix("Observation", "date", "le", "2024-02-01")
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_date_search_eq_ignores_period_tag() {
        let index = SearchIndex::open(":memory:").unwrap();
        index
            .add_index("Observation", "o2", "date", "date", Some("2024-01-01"), Some("period-start"))
            .unwrap();

        let results = index
            .search_date_with_prefix("Observation", "date", "eq", "2024-01-01")
            .unwrap();
        assert_eq!(results, vec!["o2"]);
    }

    #[test]
    fn test_uri_search() {
        let index = SearchIndex::open(":memory:").unwrap();
        index
            .add_index("ValueSet", "vs1", "url", "uri", Some("http://example.org/vs"), None)
            .unwrap();

        let results = index
            .search_uri("ValueSet", "url", "http://example.org/vs")
            .unwrap();
        assert_eq!(results, vec!["vs1"]);

        let empty = index.search_uri("ValueSet", "url", "http://other.org").unwrap();
        assert!(empty.is_empty());
    }
}
