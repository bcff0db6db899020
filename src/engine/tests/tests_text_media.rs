//! Text relevance (@@) and multimedia similarity (<->) through SQL.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::engine::tests::helpers::*;

    #[test]
    fn text_match_ranks_documents() {
        let tmp = TempDir::new().unwrap();
        let engine = fresh_engine(&tmp);
        let csv = write_csv(
            tmp.path(),
            "docs.csv",
            "id,body\n\
             d1,love and light\n\
             d2,light and shadow\n",
        );
        engine
            .execute(&format!(
                r#"CREATE TABLE docs FROM FILE "{csv}" USING INDEX spimi("body")"#
            ))
            .unwrap();

        let out = engine
            .execute(r#"SELECT id FROM docs WHERE body @@ "light love""#)
            .unwrap();
        assert_eq!(out.columns, vec!["id", "score"]);
        let ids: Vec<&str> = out.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);
        let s0: f64 = out.rows[0][1].parse().unwrap();
        let s1: f64 = out.rows[1][1].parse().unwrap();
        assert!(s0 > s1);

        let out = engine
            .execute(r#"SELECT id FROM docs WHERE body @@ "shadow""#)
            .unwrap();
        let ids: Vec<&str> = out.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(ids, vec!["d2"]);
    }

    #[test]
    fn text_insert_and_delete_flow_through_the_index() {
        let tmp = TempDir::new().unwrap();
        let engine = fresh_engine(&tmp);
        let csv = write_csv(tmp.path(), "docs.csv", "id,body\nd1,stellar wind\n");
        engine
            .execute(&format!(
                r#"CREATE TABLE docs FROM FILE "{csv}" USING INDEX spimi("body")"#
            ))
            .unwrap();

        engine
            .execute(r#"INSERT INTO docs VALUES ("d2", "stellar dust storm")"#)
            .unwrap();
        let out = engine
            .execute(r#"SELECT id FROM docs WHERE body @@ "dust""#)
            .unwrap();
        assert_eq!(out.rows[0][0], "d2");

        engine.execute(r#"DELETE FROM docs WHERE id = "d2""#).unwrap();
        let out = engine
            .execute(r#"SELECT id FROM docs WHERE body @@ "dust""#)
            .unwrap();
        assert_eq!(out.count, 0);
    }

    #[test]
    fn multi_field_text_index_supports_field_scoping() {
        let tmp = TempDir::new().unwrap();
        let engine = fresh_engine(&tmp);
        let csv = write_csv(
            tmp.path(),
            "books.csv",
            "title,summary\n\
             dark tower,a long story\n\
             green hills,a dark night\n",
        );
        engine
            .execute(&format!(
                r#"CREATE TABLE books FROM FILE "{csv}" USING INDEX spimi("title", "summary")"#
            ))
            .unwrap();

        // Scoped to the title field: only the first book.
        let out = engine
            .execute(r#"SELECT title FROM books WHERE title @@ "dark""#)
            .unwrap();
        assert_eq!(out.count, 1);
        assert_eq!(out.rows[0][0], "dark tower");
    }

    #[test]
    fn multimedia_similarity_both_methods_agree() {
        let tmp = TempDir::new().unwrap();
        let engine = fresh_engine(&tmp);

        // Three "assets" with controlled byte content.
        for (name, bytes) in
            [("a.bin", vec![1u8; 64]), ("b.bin", vec![200u8; 64]), ("c.bin", {
                let mut v = vec![1u8; 32];
                v.extend(vec![200u8; 32]);
                v
            })]
        {
            std::fs::write(tmp.path().join(name), bytes).unwrap();
        }
        let csv = write_csv(
            tmp.path(),
            "pics.csv",
            &format!(
                "id,file_path\n\
                 a,{a}\n\
                 b,{b}\n\
                 c,{c}\n",
                a = tmp.path().join("a.bin").display(),
                b = tmp.path().join("b.bin").display(),
                c = tmp.path().join("c.bin").display(),
            ),
        );

        engine
            .execute(&format!(
                r#"CREATE MULTIMEDIA TABLE pics FROM FILE "{csv}" USING image WITH METHOD histogram CLUSTERS 8"#
            ))
            .unwrap();

        let query = tmp.path().join("q.bin");
        std::fs::write(&query, vec![1u8; 64]).unwrap();
        let query = query.display();

        let inverted = engine
            .execute(&format!(
                r#"SELECT id FROM pics WHERE file_path <-> "{query}" METHOD inverted"#
            ))
            .unwrap();
        let sequential = engine
            .execute(&format!(
                r#"SELECT id FROM pics WHERE file_path <-> "{query}" METHOD sequential"#
            ))
            .unwrap();

        let inv_ids: Vec<&str> = inverted.rows.iter().map(|r| r[0].as_str()).collect();
        let seq_ids: Vec<&str> = sequential.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(inv_ids, seq_ids);
        assert_eq!(inv_ids[0], "a");
        assert_eq!(inv_ids[1], "c");
        assert_eq!(inverted.columns, vec!["id", "score"]);
    }

    #[test]
    fn multimedia_insert_and_delete() {
        let tmp = TempDir::new().unwrap();
        let engine = fresh_engine(&tmp);

        std::fs::write(tmp.path().join("x.bin"), vec![7u8; 32]).unwrap();
        let csv = write_csv(
            tmp.path(),
            "pics.csv",
            &format!("id,file_path\nx,{}\n", tmp.path().join("x.bin").display()),
        );
        engine
            .execute(&format!(
                r#"CREATE MULTIMEDIA TABLE pics FROM FILE "{csv}" USING audio WITH METHOD histogram CLUSTERS 4"#
            ))
            .unwrap();

        std::fs::write(tmp.path().join("y.bin"), vec![9u8; 32]).unwrap();
        engine
            .execute(&format!(
                r#"INSERT INTO pics VALUES ("y", "{}")"#,
                tmp.path().join("y.bin").display()
            ))
            .unwrap();

        let out = engine
            .execute(&format!(
                r#"SELECT id FROM pics WHERE file_path <-> "{}""#,
                tmp.path().join("y.bin").display()
            ))
            .unwrap();
        assert_eq!(out.rows[0][0], "y");

        engine.execute(r#"DELETE FROM pics WHERE id = "y""#).unwrap();
        let out = engine
            .execute(&format!(
                r#"SELECT id FROM pics WHERE file_path <-> "{}""#,
                tmp.path().join("y.bin").display()
            ))
            .unwrap();
        assert!(out.rows.iter().all(|r| r[0] != "y"));
    }
}
