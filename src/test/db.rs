#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::db::{
        MachineFilter, add_progress, all_certifications, all_techniques, authenticate_user,
        clean_expired_sessions, create_user, create_user_session, get_machine,
        get_session_by_token, list_machines, remove_progress, replace_machine_techniques,
        reseed_roadmap, skill_tree, solved_count, techniques_for_machine, upsert_machine,
        user_completed_machines, weeks_for_certification,
    };
    use crate::error::AppError;
    use crate::models::Technique;
    use crate::sync::roadmap::{LINKED, MISSING, NameRef, SeedWeek};
    use crate::test::utils::{STANDARD_PASSWORD, TestDbBuilder, test_machine};

    fn linked_ref(name: &str, id: i64) -> NameRef {
        NameRef {
            name: name.to_string(),
            id: Some(id),
            status: Some(LINKED.to_string()),
            matched_name: None,
        }
    }

    fn missing_ref(name: &str) -> NameRef {
        NameRef {
            name: name.to_string(),
            id: None,
            status: Some(MISSING.to_string()),
            matched_name: None,
        }
    }

    fn seed_week(
        certification: &str,
        week_number: i64,
        machines: Vec<NameRef>,
        techniques: Vec<NameRef>,
    ) -> SeedWeek {
        SeedWeek {
            certification: certification.to_string(),
            cert_summary: None,
            cert_tips: None,
            week_number,
            title: format!("Week {}", week_number),
            description: None,
            machines,
            techniques,
            extra: serde_json::Map::new(),
        }
    }

    #[rocket::async_test]
    async fn upsert_replaces_every_column() {
        let test_db = TestDbBuilder::new().build().await.unwrap();

        let mut machine = test_machine(1, "Lame");
        machine.points = Some(20);
        machine.stars = Some(4.1);
        upsert_machine(&test_db.pool, &machine).await.unwrap();

        let mut updated = test_machine(1, "Lame");
        updated.points = None;
        updated.stars = Some(4.8);
        updated.status = "retired".to_string();
        upsert_machine(&test_db.pool, &updated).await.unwrap();

        let stored = get_machine(&test_db.pool, 1).await.unwrap();
        assert_eq!(stored.status, "retired");
        assert_eq!(stored.stars, Some(4.8));
        // Full replace: the old value does not survive a now-NULL field
        assert_eq!(stored.points, None);
    }

    #[rocket::async_test]
    async fn list_machines_filters_and_counts() {
        let mut hard = test_machine(4, "Kraken");
        hard.difficulty_text = Some("Hard".to_string());
        hard.os = Some("Windows".to_string());

        let test_db = TestDbBuilder::new()
            .machine(1, "Lame")
            .machine(2, "Blue")
            .machine(3, "Blunder")
            .machine_full(hard)
            .build()
            .await
            .unwrap();

        let (machines, total) = list_machines(
            &test_db.pool,
            &MachineFilter {
                search: Some("blu".to_string()),
                page: 1,
                page_size: 20,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(total, 2);
        assert!(machines.iter().all(|m| m.name.starts_with("Blu")));

        let (machines, total) = list_machines(
            &test_db.pool,
            &MachineFilter {
                difficulty: Some("Hard".to_string()),
                os: Some("Windows".to_string()),
                page: 1,
                page_size: 20,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(machines[0].name, "Kraken");
    }

    #[rocket::async_test]
    async fn list_machines_pages_without_losing_total() {
        let test_db = TestDbBuilder::new()
            .machine(1, "One")
            .machine(2, "Two")
            .machine(3, "Three")
            .build()
            .await
            .unwrap();

        let (page_one, total) = list_machines(
            &test_db.pool,
            &MachineFilter {
                page: 1,
                page_size: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let (page_two, _) = list_machines(
            &test_db.pool,
            &MachineFilter {
                page: 2,
                page_size: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(total, 3);
        assert_eq!(page_one.len(), 2);
        assert_eq!(page_two.len(), 1);
    }

    #[rocket::async_test]
    async fn missing_machine_is_not_found() {
        let test_db = TestDbBuilder::new().build().await.unwrap();

        let result = get_machine(&test_db.pool, 999).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[rocket::async_test]
    async fn technique_rebuild_replaces_links_wholesale() {
        let test_db = TestDbBuilder::new()
            .machine(1, "Lame")
            .machine(2, "Blue")
            .technique(10, "SQL Injection")
            .link(1, 10)
            .link(2, 10)
            .build()
            .await
            .unwrap();

        let rebuilt = vec![
            Technique {
                id: 10,
                name: "SQLi".to_string(),
                category: "Technique".to_string(),
            },
            Technique {
                id: 11,
                name: "Brute Force".to_string(),
                category: "Technique".to_string(),
            },
        ];
        replace_machine_techniques(&test_db.pool, &rebuilt, &[(1, 11)])
            .await
            .unwrap();

        let lame = techniques_for_machine(&test_db.pool, 1).await.unwrap();
        assert_eq!(lame.len(), 1);
        assert_eq!(lame[0].id, 11);

        let blue = techniques_for_machine(&test_db.pool, 2).await.unwrap();
        assert!(blue.is_empty());

        // Upserted, not deleted: the renamed technique survives
        let techniques = all_techniques(&test_db.pool).await.unwrap();
        assert!(techniques.iter().any(|t| t.id == 10 && t.name == "SQLi"));
    }

    #[rocket::async_test]
    async fn progress_insert_is_idempotent() {
        let test_db = TestDbBuilder::new()
            .user("alice", None)
            .machine(1, "Lame")
            .build()
            .await
            .unwrap();
        let alice = test_db.user_id("alice").unwrap();

        add_progress(&test_db.pool, alice, 1).await.unwrap();
        add_progress(&test_db.pool, alice, 1).await.unwrap();
        assert_eq!(solved_count(&test_db.pool, alice).await.unwrap(), 1);

        remove_progress(&test_db.pool, alice, 1).await.unwrap();
        assert_eq!(solved_count(&test_db.pool, alice).await.unwrap(), 0);

        // Removing an absent row is a no-op
        remove_progress(&test_db.pool, alice, 1).await.unwrap();
    }

    #[rocket::async_test]
    async fn completed_machines_carry_completion_timestamp() {
        let test_db = TestDbBuilder::new()
            .user("alice", None)
            .machine(1, "Lame")
            .completed("alice", 1)
            .build()
            .await
            .unwrap();
        let alice = test_db.user_id("alice").unwrap();

        let completed = user_completed_machines(&test_db.pool, alice).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].machine.name, "Lame");
        assert!(completed[0].tracked_at <= Utc::now());
    }

    #[rocket::async_test]
    async fn skill_tree_counts_machines_and_completions() {
        let test_db = TestDbBuilder::new()
            .user("alice", None)
            .machine(1, "Lame")
            .machine(2, "Blue")
            .technique(10, "SQL Injection")
            .technique(11, "Brute Force")
            .link(1, 10)
            .link(2, 10)
            .completed("alice", 1)
            .build()
            .await
            .unwrap();
        let alice = test_db.user_id("alice").unwrap();

        let nodes = skill_tree(&test_db.pool, alice).await.unwrap();

        let sqli = nodes.iter().find(|n| n.technique_id == 10).unwrap();
        assert_eq!(sqli.machine_count, 2);
        assert_eq!(sqli.completed_count, 1);

        let brute = nodes.iter().find(|n| n.technique_id == 11).unwrap();
        assert_eq!(brute.machine_count, 0);
        assert_eq!(brute.completed_count, 0);
    }

    #[rocket::async_test]
    async fn expired_sessions_are_swept() {
        let test_db = TestDbBuilder::new().user("alice", None).build().await.unwrap();
        let alice = test_db.user_id("alice").unwrap();

        let past = (Utc::now() - chrono::Duration::hours(2)).naive_utc();
        let future = (Utc::now() + chrono::Duration::hours(2)).naive_utc();

        create_user_session(&test_db.pool, alice, "stale-token", past)
            .await
            .unwrap();
        create_user_session(&test_db.pool, alice, "live-token", future)
            .await
            .unwrap();

        let swept = clean_expired_sessions(&test_db.pool).await.unwrap();
        assert_eq!(swept, 1);

        assert!(get_session_by_token(&test_db.pool, "stale-token").await.is_err());
        let live = get_session_by_token(&test_db.pool, "live-token").await.unwrap();
        assert!(live.is_valid());
    }

    #[rocket::async_test]
    async fn wrong_password_does_not_authenticate() {
        let test_db = TestDbBuilder::new().user("alice", None).build().await.unwrap();

        let user = authenticate_user(&test_db.pool, "alice", STANDARD_PASSWORD)
            .await
            .unwrap();
        assert!(user.is_some());

        let user = authenticate_user(&test_db.pool, "alice", "nope")
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[rocket::async_test]
    async fn duplicate_username_is_rejected() {
        let test_db = TestDbBuilder::new().user("alice", None).build().await.unwrap();

        let result = create_user(&test_db.pool, "alice", "another-password", None).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[rocket::async_test]
    async fn reseed_replaces_weeks_and_keeps_certifications() {
        let test_db = TestDbBuilder::new()
            .machine(1, "Lame")
            .machine(2, "Blue")
            .technique(10, "SQL Injection")
            .build()
            .await
            .unwrap();

        let first = vec![
            seed_week("eJPT", 1, vec![linked_ref("Lame", 1)], vec![]),
            seed_week(
                "eJPT",
                2,
                vec![linked_ref("Blue", 2), missing_ref("Ghost")],
                vec![linked_ref("SQL Injection", 10)],
            ),
        ];
        let report = reseed_roadmap(&test_db.pool, &first).await.unwrap();
        assert_eq!(report.certifications, 1);
        assert_eq!(report.weeks, 2);
        // The missing ref contributes no link
        assert_eq!(report.machine_links, 2);
        assert_eq!(report.technique_links, 1);

        let certs = all_certifications(&test_db.pool).await.unwrap();
        assert_eq!(certs.len(), 1);
        let cert_id = certs[0].id;

        let second = vec![seed_week("eJPT", 1, vec![linked_ref("Blue", 2)], vec![])];
        reseed_roadmap(&test_db.pool, &second).await.unwrap();

        let certs = all_certifications(&test_db.pool).await.unwrap();
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].id, cert_id);

        let weeks = weeks_for_certification(&test_db.pool, cert_id).await.unwrap();
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].week_number, 1);
    }
}
