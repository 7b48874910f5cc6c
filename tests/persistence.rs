//! Persistence and recovery tests for the warden engine.
//!
//! These tests verify that entities, hierarchy edges, the reachability index,
//! and rules survive an engine restart (close + reopen cycle), and that
//! decisions are identical across sessions.

use std::path::Path;

use warden::declare::Declarations;
use warden::engine::{Engine, EngineConfig};
use warden::entity::{Decision, EntityKind, RuleSide};

fn persistent_engine(dir: &Path) -> Engine {
    Engine::new(EngineConfig {
        data_dir: Some(dir.to_path_buf()),
    })
    .unwrap()
}

#[test]
fn entities_and_rules_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    // First session: build a small world.
    {
        let engine = persistent_engine(dir.path());
        engine.register_subject("alice", "Alice").unwrap();
        engine.register_object("doc", "The document").unwrap();
        engine.register_permission("edit", "Edit access").unwrap();
        engine.grant("alice", "doc", "edit").unwrap();
    }

    // Second session: everything is still there.
    {
        let engine = persistent_engine(dir.path());
        let alice = engine.lookup(EntityKind::Subject, "alice").unwrap().unwrap();
        assert_eq!(alice.description, "Alice");
        assert!(!alice.is_static);

        let rules = engine.list_rules(RuleSide::Subject, "alice").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].permission, "edit");

        assert_eq!(engine.decision("alice", "doc", "edit").unwrap(), Decision::Granted);
    }
}

#[test]
fn hierarchy_and_closure_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let engine = persistent_engine(dir.path());
        engine.register_subject("staff", "Staff").unwrap();
        engine.register_subject("editors", "Editors").unwrap();
        engine.register_subject("alice", "Alice").unwrap();
        engine.add_child(EntityKind::Subject, "staff", "editors").unwrap();
        engine.add_child(EntityKind::Subject, "editors", "alice").unwrap();
        engine.register_object("doc", "The document").unwrap();
        engine.register_permission("edit", "Edit access").unwrap();
        engine.grant("staff", "doc", "edit").unwrap();
    }

    {
        let engine = persistent_engine(dir.path());
        // Closure-backed queries work without any warm-up writes.
        assert_eq!(
            engine.members(EntityKind::Subject, "staff").unwrap(),
            vec!["alice", "editors"]
        );
        assert_eq!(engine.decision("alice", "doc", "edit").unwrap(), Decision::Granted);
    }
}

#[test]
fn surrogate_ids_are_not_reused_after_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    let first_id;
    {
        let engine = persistent_engine(dir.path());
        engine.register_subject("alice", "Alice").unwrap();
        first_id = engine
            .lookup(EntityKind::Subject, "alice")
            .unwrap()
            .unwrap()
            .id;
    }

    {
        let engine = persistent_engine(dir.path());
        engine.register_subject("bob", "Bob").unwrap();
        let bob = engine.lookup(EntityKind::Subject, "bob").unwrap().unwrap();
        assert!(bob.id.get() > first_id.get());
        // alice keeps her original surrogate.
        let alice = engine.lookup(EntityKind::Subject, "alice").unwrap().unwrap();
        assert_eq!(alice.id, first_id);
    }
}

#[test]
fn suprema_are_created_once() {
    let dir = tempfile::TempDir::new().unwrap();

    let sup_id;
    {
        let engine = persistent_engine(dir.path());
        sup_id = engine
            .lookup(EntityKind::Permission, "*")
            .unwrap()
            .unwrap()
            .id;
    }

    {
        let engine = persistent_engine(dir.path());
        let sup = engine.lookup(EntityKind::Permission, "*").unwrap().unwrap();
        assert_eq!(sup.id, sup_id);
        assert_eq!(engine.info().unwrap().permissions, 1);
    }
}

#[test]
fn reconciled_state_survives_and_reconverges() {
    let dir = tempfile::TempDir::new().unwrap();
    let decls = Declarations::new()
        .permission("read", "Read documents", Vec::<String>::new())
        .permission("edit", "Edit documents", ["read"])
        .role("admin", "Administrators", Vec::<String>::new())
        .collection("docs", "All documents", Vec::<String>::new())
        .grant("edit", "docs", "admin");

    {
        let engine = persistent_engine(dir.path());
        engine.init(&decls).unwrap();
        assert_eq!(engine.decision("admin", "docs", "read").unwrap(), Decision::Granted);
    }

    {
        let engine = persistent_engine(dir.path());
        // The declared world persisted as-is.
        assert_eq!(engine.decision("admin", "docs", "read").unwrap(), Decision::Granted);

        // A second convergence across sessions changes nothing.
        let report = engine.init(&decls).unwrap();
        assert_eq!(report.entities_swept, 0);
        assert_eq!(report.edges_added, 0);
        assert_eq!(report.edges_removed, 0);
        assert_eq!(engine.decision("admin", "docs", "read").unwrap(), Decision::Granted);
    }
}

#[test]
fn interrupted_style_partial_state_is_never_visible() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let engine = persistent_engine(dir.path());
        engine.register_subject("u1", "User").unwrap();
        engine.register_object("o1", "Object").unwrap();
        engine.register_permission("edit", "Edit").unwrap();

        // A failed mutation leaves no trace: the deny conflicts and the
        // transaction rolls back wholesale.
        engine.grant("u1", "o1", "edit").unwrap();
        assert!(engine.deny("u1", "o1", "edit").is_err());
    }

    {
        let engine = persistent_engine(dir.path());
        let rules = engine.list_rules(RuleSide::Subject, "u1").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(engine.decision("u1", "o1", "edit").unwrap(), Decision::Granted);
    }
}
