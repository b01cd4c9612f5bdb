use amari_maxent::{
    AmariSolve, ConstraintMatrix, ErrorKind, MatrixStore, MaxEntError, ParameterSpace,
    StoreConfig,
};
use std::fs;
use tempfile::tempdir;

#[test]
fn miss_builds_and_hit_loads() {
    let dir = tempdir().unwrap();
    let store = MatrixStore::new(StoreConfig::new(dir.path().join("nested")));
    let space = ParameterSpace::complete(3, 3).unwrap();

    assert!(store.load(&space).unwrap().is_none());
    let built = store.load_or_build(&space).unwrap();
    let path = store.path_for(3, 3);
    assert!(path.is_file());

    let loaded = store.load(&space).unwrap().unwrap();
    assert_eq!(loaded, built);
    assert_eq!(loaded, ConstraintMatrix::build(&space));

    // Lower orders are served from the same artifact.
    let lower = store.load_or_build(&space.with_order(1).unwrap()).unwrap();
    assert_eq!(lower.order(), 3);
}

#[test]
fn no_temporary_files_are_left_behind() {
    let dir = tempdir().unwrap();
    let store = MatrixStore::new(StoreConfig::new(dir.path()));
    store
        .load_or_build(&ParameterSpace::complete(2, 3).unwrap())
        .unwrap();
    store
        .load_or_build(&ParameterSpace::complete(3, 2).unwrap())
        .unwrap();

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a_n2m3.json", "a_n3m2.json"]);
}

#[test]
fn missing_artifact_without_building_fails() {
    let dir = tempdir().unwrap();
    let store = MatrixStore::new(StoreConfig::new(dir.path()).with_build_if_missing(false));
    let e = store
        .load_or_build(&ParameterSpace::complete(2, 2).unwrap())
        .unwrap_err();
    assert!(matches!(e, MaxEntError::MissingArtifact { .. }));
    assert_eq!(e.kind(), ErrorKind::StorageFailure);
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn stale_artifact_is_rebuilt_or_rejected() {
    let dir = tempdir().unwrap();
    let space = ParameterSpace::new(3, 2, 1).unwrap();
    MatrixStore::new(StoreConfig::new(dir.path()))
        .load_or_build(&space)
        .unwrap();

    let strict = MatrixStore::new(StoreConfig::new(dir.path()).with_build_if_missing(false));
    let e = strict.load_or_build(&space.with_order(3).unwrap()).unwrap_err();
    assert!(matches!(
        e,
        MaxEntError::InsufficientOrder {
            built: 1,
            requested: 3
        }
    ));

    let rebuilt = MatrixStore::new(StoreConfig::new(dir.path()))
        .load_or_build(&space.with_order(3).unwrap())
        .unwrap();
    assert_eq!(rebuilt.order(), 3);
    assert_eq!(strict.load(&space).unwrap().unwrap().order(), 3);
}

#[test]
fn artifact_for_other_parameters_is_rejected() {
    let dir = tempdir().unwrap();
    let store = MatrixStore::new(StoreConfig::new(dir.path()));
    let path = store
        .save(&ConstraintMatrix::build(&ParameterSpace::complete(2, 2).unwrap()))
        .unwrap();
    fs::copy(&path, store.path_for(2, 3)).unwrap();

    let e = store
        .load(&ParameterSpace::complete(2, 3).unwrap())
        .unwrap_err();
    assert!(matches!(
        e,
        MaxEntError::DimensionMismatch {
            expected: 3,
            got: 2,
            ..
        }
    ));
}

#[test]
fn corrupt_artifact_is_rejected() {
    let dir = tempdir().unwrap();
    let store = MatrixStore::new(StoreConfig::new(dir.path()));
    fs::write(store.path_for(2, 2), b"{\"n\": 2, \"m\": 2").unwrap();
    let e = store
        .load_or_build(&ParameterSpace::complete(2, 2).unwrap())
        .unwrap_err();
    assert!(matches!(e, MaxEntError::Corrupt { .. }));
}

#[test]
fn well_formed_json_with_broken_rows_is_corrupt() {
    let dir = tempdir().unwrap();
    let store = MatrixStore::new(StoreConfig::new(dir.path()));
    let space = ParameterSpace::complete(2, 2).unwrap();
    let artifacts = [
        // Row pointers go backwards.
        r#"{"n":2,"m":2,"order":2,"order_idx":[0,2,3,4],"indptr":[0,3,2,5],"indices":[0,1,2,0,1]}"#,
        // Row 0 lists its columns out of order.
        r#"{"n":2,"m":2,"order":2,"order_idx":[0,2,3,4],"indptr":[0,2,4,5],"indices":[2,1,0,2,2]}"#,
        // A column past the last state.
        r#"{"n":2,"m":2,"order":2,"order_idx":[0,2,3,4],"indptr":[0,2,4,5],"indices":[1,2,0,2,3]}"#,
        // Too few rows for the order.
        r#"{"n":2,"m":2,"order":2,"order_idx":[0,2,3,4],"indptr":[0,2,4],"indices":[1,2,0,2]}"#,
    ];
    for text in artifacts.iter() {
        fs::write(store.path_for(2, 2), text).unwrap();
        let e = store.load(&space).unwrap_err();
        assert!(matches!(e, MaxEntError::Corrupt { .. }), "{}: {:?}", text, e);
        assert_eq!(e.kind(), ErrorKind::StorageFailure);
    }
}

#[test]
fn solver_from_store() {
    let dir = tempdir().unwrap();
    let store = MatrixStore::new(StoreConfig::new(dir.path()));
    let space = ParameterSpace::complete(2, 3).unwrap();
    let first = AmariSolve::from_store(&store, &space).unwrap();
    let second = AmariSolve::from_store(&store, &space).unwrap();
    assert_eq!(first.matrix(), second.matrix());

    let p = vec![1.0 / 9.0; 9];
    assert_eq!(first.theta_from_p(&p).unwrap().len(), 8);
}
