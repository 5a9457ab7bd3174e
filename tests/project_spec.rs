use speculate2::speculate;
use tempfile::TempDir;
use trackplan::models::*;
use trackplan::{ErrorKind, ProjectName, Workspace};

fn create_roadmap_with_track(workspace: &Workspace, project: &str) -> Track {
    let ctx = workspace.resolve(Some(project)).expect("Failed to resolve project");
    let repo = workspace.open_project(&ctx).expect("Failed to open project");
    let roadmap = repo
        .create_roadmap(CreateRoadmapInput {
            vision: format!("{} vision", project),
            success_criteria: "It ships".to_string(),
        })
        .expect("Failed to create roadmap");
    repo.create_track(CreateTrackInput {
        roadmap_id: roadmap.id,
        title: "Core".to_string(),
        ..Default::default()
    })
    .expect("Failed to create track")
}

speculate! {
    before {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let workspace = Workspace::new(dir.path());
    }

    describe "create_project" {
        it "creates an empty store" {
            let ctx = workspace.create_project("alpha", None).unwrap();
            assert_eq!(ctx.name.as_str(), "alpha");
            assert!(ctx.db_path.exists());

            let repo = workspace.open_project(&ctx).unwrap();
            assert!(repo.get_active_roadmap().unwrap().is_none());
        }

        it "refuses a duplicate name" {
            workspace.create_project("alpha", None).unwrap();
            let err = workspace.create_project("alpha", None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        }

        it "rejects names that are not path safe" {
            let err = workspace.create_project("../escape", None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert!(workspace.list_projects().unwrap().is_empty());
        }

        it "uses the derived code as id prefix" {
            let ctx = workspace.create_project("web-app", None).unwrap();
            let track = create_roadmap_with_track(&workspace, "web-app");
            assert_eq!(track.id, "WEBA-track-1");
            assert_eq!(workspace.open_project(&ctx).unwrap().project_code().unwrap(), "WEBA");
        }

        it "uses an explicit code when given" {
            workspace.create_project("web-app", Some("wa")).unwrap();
            let track = create_roadmap_with_track(&workspace, "web-app");
            assert_eq!(track.id, "WA-track-1");
        }
    }

    describe "isolation" {
        it "keeps each project's data to itself" {
            workspace.create_project("alpha", None).unwrap();
            let beta = workspace.create_project("beta", None).unwrap();
            let track = create_roadmap_with_track(&workspace, "alpha");

            let repo = workspace.open_project(&beta).unwrap();
            assert!(repo.get_track(&track.id).unwrap().is_none());
            assert!(repo.get_active_roadmap().unwrap().is_none());
        }

        it "keeps sequences per project" {
            workspace.create_project("alpha", Some("TP")).unwrap();
            workspace.create_project("beta", Some("TP")).unwrap();
            let a = create_roadmap_with_track(&workspace, "alpha");
            let b = create_roadmap_with_track(&workspace, "beta");
            assert_eq!(a.id, "TP-track-1");
            assert_eq!(b.id, "TP-track-1");
        }
    }

    describe "open_project" {
        it "reports a missing project as not found" {
            let ctx = workspace.resolve(Some("ghost")).unwrap();
            let err = workspace.open_project(&ctx).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }

        it "reuses the open handle" {
            let ctx = workspace.create_project("alpha", None).unwrap();
            let first = workspace.open_project(&ctx).unwrap();
            let second = workspace.open_project(&ctx).unwrap();
            first.set_metadata("owner", "platform").unwrap();
            assert_eq!(second.get_metadata("owner").unwrap().as_deref(), Some("platform"));
        }

        it "reopens a store written by another workspace" {
            workspace.create_project("alpha", None).unwrap();
            let track = create_roadmap_with_track(&workspace, "alpha");

            let reopened = Workspace::new(dir.path());
            let ctx = reopened.resolve(Some("alpha")).unwrap();
            let repo = reopened.open_project(&ctx).unwrap();
            assert_eq!(repo.get_track(&track.id).unwrap().unwrap().title, "Core");
        }
    }

    describe "active project" {
        it "falls back to the configured default" {
            let workspace = Workspace::new(dir.path()).with_default_project("main");
            assert!(workspace.active_project().unwrap().is_none());
            assert_eq!(workspace.resolve(None).unwrap().name.as_str(), "main");
        }

        it "persists the chosen project" {
            workspace.create_project("alpha", None).unwrap();
            workspace.set_active_project("alpha").unwrap();
            assert_eq!(
                workspace.active_project().unwrap(),
                Some(ProjectName::parse("alpha").unwrap())
            );
            assert_eq!(workspace.resolve(None).unwrap().name.as_str(), "alpha");
        }

        it "lets an explicit name win over the active project" {
            workspace.create_project("alpha", None).unwrap();
            workspace.create_project("beta", None).unwrap();
            workspace.set_active_project("alpha").unwrap();
            assert_eq!(workspace.resolve(Some("beta")).unwrap().name.as_str(), "beta");
        }

        it "cannot activate a missing project" {
            let err = workspace.set_active_project("ghost").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
    }

    describe "list_projects" {
        it "returns names sorted" {
            for name in ["gamma", "alpha", "beta"] {
                workspace.create_project(name, None).unwrap();
            }
            let names: Vec<_> = workspace.list_projects().unwrap()
                .iter().map(|n| n.to_string()).collect();
            assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        }
    }

    describe "delete_project" {
        it "removes the project and its data" {
            workspace.create_project("alpha", None).unwrap();
            let beta = workspace.create_project("beta", None).unwrap();
            workspace.set_active_project("alpha").unwrap();

            workspace.delete_project("beta").unwrap();
            assert!(!beta.db_path.exists());
            let names: Vec<_> = workspace.list_projects().unwrap()
                .iter().map(|n| n.to_string()).collect();
            assert_eq!(names, vec!["alpha"]);
        }

        it "refuses to delete the active project" {
            workspace.create_project("alpha", None).unwrap();
            workspace.set_active_project("alpha").unwrap();
            let err = workspace.delete_project("alpha").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
            assert!(workspace.project_exists(&ProjectName::parse("alpha").unwrap()));
        }

        it "refuses to delete the default project while it is active" {
            workspace.create_project("default", None).unwrap();
            let err = workspace.delete_project("default").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }

        it "reports a missing project as not found" {
            let err = workspace.delete_project("ghost").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
    }
}
