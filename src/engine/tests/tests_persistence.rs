//! Reopening an engine rediscovers and serves existing tables.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::engine::Engine;
    use crate::engine::tests::helpers::*;

    #[test]
    fn reopen_serves_existing_tables() {
        let tmp = TempDir::new().unwrap();
        let csv = students_csv(tmp.path());

        {
            let engine = fresh_engine(&tmp);
            engine
                .execute(&format!(
                    r#"CREATE TABLE students FROM FILE "{csv}" USING INDEX btree("math_score")"#
                ))
                .unwrap();
            engine.execute(r#"INSERT INTO students VALUES ("gina", 88)"#).unwrap();
            engine.execute("DELETE FROM students WHERE math_score = 61").unwrap();
        }

        let engine = Engine::open(tmp.path().join("db"), small_config()).unwrap();
        let out = engine
            .execute("SELECT name FROM students WHERE math_score BETWEEN 85 AND 92")
            .unwrap();
        let names: Vec<&str> = out.rows.iter().map(|r| r[0].as_str()).collect();
        assert!(names.contains(&"gina"));
        assert!(names.contains(&"bruno"));

        let out = engine
            .execute("SELECT * FROM students WHERE math_score = 61")
            .unwrap();
        assert_eq!(out.count, 0);
    }

    #[test]
    fn reopen_restores_text_tombstones() {
        let tmp = TempDir::new().unwrap();
        let csv = write_csv(
            tmp.path(),
            "docs.csv",
            "id,body\nd1,alpha beta\nd2,alpha gamma\n",
        );

        {
            let engine = fresh_engine(&tmp);
            engine
                .execute(&format!(
                    r#"CREATE TABLE docs FROM FILE "{csv}" USING INDEX spimi("body")"#
                ))
                .unwrap();
            engine.execute(r#"DELETE FROM docs WHERE id = "d1""#).unwrap();
        }

        // The text index has no tombstone artifact; the engine re-derives
        // them from the record store on open.
        let engine = Engine::open(tmp.path().join("db"), small_config()).unwrap();
        let out = engine
            .execute(r#"SELECT id FROM docs WHERE body @@ "alpha""#)
            .unwrap();
        let ids: Vec<&str> = out.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(ids, vec!["d2"]);
    }

    #[test]
    fn stats_reflect_registered_tables() {
        let tmp = TempDir::new().unwrap();
        let engine = fresh_engine(&tmp);
        let csv = students_csv(tmp.path());
        engine
            .execute(&format!(
                r#"CREATE TABLE students FROM FILE "{csv}" USING INDEX isam("math_score")"#
            ))
            .unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.tables.len(), 1);
        assert_eq!(stats.tables[0].name, "students");
        assert_eq!(stats.tables[0].index_kind, "isam");
        assert_eq!(stats.tables[0].record_slots, 6);
    }
}
