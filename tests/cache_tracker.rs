use flowcache::config::DomainConfig;
use flowcache::paths::{self, CacheStage, EXT_UNI};
use flowcache::{
    CacheSettings, CacheStageFlags, FluidCache, GridDescriptor, GridView, MeshNode, MeshSnapshot,
    MeshTriangle, ParticleRecord, ParticleSystem, SolverRegistry, VelocityRecord,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_UNIQUIFIER: AtomicU64 = AtomicU64::new(0);

fn test_root(name: &str) -> PathBuf {
    let serial = TEST_UNIQUIFIER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!("flowcache-it-{name}-{}-{}", std::process::id(), serial));
    let _ = std::fs::remove_dir_all(&path);
    std::fs::create_dir_all(&path).expect("create test root");
    path
}

fn cache_with(root: &Path, settings: CacheSettings) -> FluidCache {
    let mut registry = SolverRegistry::new();
    FluidCache::new(registry.allocate(), root, settings)
}

fn particles(count: usize) -> ParticleSystem {
    ParticleSystem {
        records: (0..count)
            .map(|i| ParticleRecord {
                position: [i as f32, 0.5, 1.5],
                flag: 1,
            })
            .collect(),
        velocities: (0..count)
            .map(|i| VelocityRecord {
                vector: [0.0, -(i as f32), 0.0],
            })
            .collect(),
        life: (0..count).map(|i| 10.0 - i as f32).collect(),
    }
}

fn triangle_mesh() -> MeshSnapshot {
    MeshSnapshot {
        nodes: vec![
            MeshNode {
                position: [0.0, 0.0, 0.0],
                normal: [0.0, 0.0, 1.0],
            },
            MeshNode {
                position: [1.0, 0.0, 0.0],
                normal: [0.0, 0.0, 1.0],
            },
            MeshNode {
                position: [0.0, 1.0, 0.0],
                normal: [0.0, 0.0, 1.0],
            },
        ],
        triangles: vec![MeshTriangle { indices: [0, 1, 2] }],
        velocities: vec![VelocityRecord { vector: [1.0, 2.0, 3.0] }; 3],
    }
}

#[test]
fn missing_frame_clears_destinations() {
    let root = test_root("missing");
    let mut cache = cache_with(&root, CacheSettings::default());

    let mut density = vec![7.0f32; 8];
    let (mut vx, mut vy, mut vz) = (vec![1.0f32; 8], vec![2.0f32; 8], vec![3.0f32; 8]);
    {
        let mut grids = [
            GridDescriptor::scalar("density", [2, 2, 2], &mut density),
            GridDescriptor::vector3("velocity", [2, 2, 2], [&mut vx, &mut vy, &mut vz]),
        ];
        assert!(!cache.update_data_structures(12, &mut grids));
    }
    assert!(density.iter().chain(&vx).chain(&vy).chain(&vz).all(|v| *v == 0.0));

    let mut system = particles(5);
    assert!(!cache.update_particle_structures(12, &mut system));
    assert!(system.is_empty());
    let mut system = particles(5);
    assert!(!cache.update_flip_structures(12, &mut system));
    assert!(system.is_empty());

    let mut mesh = triangle_mesh();
    assert!(!cache.update_mesh_structures(12, &mut mesh));
    assert_eq!(mesh, MeshSnapshot::default());

    let mut config = DomainConfig {
        time: 99,
        ..Default::default()
    };
    assert!(!cache.update_config(12, &mut config));
    assert_eq!(config, DomainConfig::default());
    assert_eq!(cache.flags(), CacheStageFlags::default());
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn partial_stage_is_not_loaded() {
    let root = test_root("partial");
    let mut cache = cache_with(&root, CacheSettings::default());
    let system = particles(4);
    cache.write_particles(2, &system).unwrap();
    let life = paths::file(&root, CacheStage::Particles, "plifesnd", EXT_UNI, 2);
    std::fs::remove_file(life).unwrap();

    let mut dest = ParticleSystem::default();
    assert!(!cache.update_particle_structures(2, &mut dest));
    assert!(!cache.flags().particles);
    // the two surviving streams were still decoded
    assert_eq!(dest.records, system.records);
    assert_eq!(dest.velocities, system.velocities);
    assert!(dest.life.is_empty());
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn corrupt_grid_fails_only_its_stage() {
    let root = test_root("corrupt");
    let mut cache = cache_with(&root, CacheSettings::default());
    let density = vec![0.25f32; 8];
    let heat = vec![0.75f32; 8];
    cache
        .write_data(
            5,
            &[
                GridView::scalar("density", [2, 2, 2], &density),
                GridView::scalar("heat", [2, 2, 2], &heat),
            ],
        )
        .unwrap();
    std::fs::write(paths::file(&root, CacheStage::Data, "heat", EXT_UNI, 5), b"not gzip").unwrap();

    let mut density_out = vec![0.0f32; 8];
    let mut heat_out = vec![9.0f32; 8];
    {
        let mut grids = [
            GridDescriptor::scalar("density", [2, 2, 2], &mut density_out),
            GridDescriptor::scalar("heat", [2, 2, 2], &mut heat_out),
        ];
        assert!(!cache.update_data_structures(5, &mut grids));
    }
    assert!(!cache.flags().data);
    assert_eq!(density_out, density);
    assert!(heat_out.iter().all(|v| *v == 0.0));
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn relative_root_never_touches_disk() {
    let mut cache = cache_with(Path::new("//cache_fluid"), CacheSettings::default());
    assert!(!cache.is_resolved());
    for stage in CacheStage::ALL {
        assert!(!cache.has_stage(stage, 1));
    }
    assert!(!cache.has_guiding(1, true));

    let mut buffer = vec![4.0f32; 1];
    let mut grids = [GridDescriptor::scalar("density", [1, 1, 1], &mut buffer)];
    assert!(!cache.update_data_structures(1, &mut grids));
    assert!(!cache.update_noise_structures(1, &mut grids));
    assert!(!cache.update_guiding_structures(1, false, &mut grids));
    let mut system = particles(1);
    assert!(!cache.update_particle_structures(1, &mut system));
    let mut mesh = MeshSnapshot::default();
    assert!(!cache.update_mesh_structures(1, &mut mesh));
    assert!(cache.clear_stage(CacheStage::Data).is_err());

    let relative = cache_with(Path::new("cache_fluid"), CacheSettings::default());
    assert!(!relative.has_data(1));
}

#[test]
fn every_stage_roundtrips_through_the_tracker() {
    let root = test_root("full");
    let settings = CacheSettings {
        mesh_velocities: true,
        ..Default::default()
    };
    let mut cache = cache_with(&root, settings);
    cache.establish_resolution(CacheStage::Data, [3, 2, 1]);

    let config = DomainConfig {
        resolution: [3, 2, 1],
        dx: 0.5,
        time: 8,
        ..Default::default()
    };
    cache.write_config(8, &config).unwrap();

    let density: Vec<f32> = (0..6).map(|i| i as f32).collect();
    let (vx, vy, vz): (Vec<f32>, Vec<f32>, Vec<f32>) = (0..6)
        .map(|i| (i as f32, i as f32 * 10.0, i as f32 * 100.0))
        .fold((vec![], vec![], vec![]), |(mut x, mut y, mut z), (a, b, c)| {
            x.push(a);
            y.push(b);
            z.push(c);
            (x, y, z)
        });
    cache
        .write_data(
            8,
            &[
                GridView::scalar("density", [3, 2, 1], &density),
                GridView::vector3("velocity", [3, 2, 1], [&vx, &vy, &vz]),
            ],
        )
        .unwrap();
    cache.write_noise(8, &[GridView::scalar("density_noise", [3, 2, 1], &density)]).unwrap();
    cache.write_flip(8, &particles(3)).unwrap();
    cache.write_particles(8, &particles(0)).unwrap();
    cache.write_mesh(8, &triangle_mesh()).unwrap();

    assert!(cache.has_config(8));
    assert!(cache.has_data(8));
    assert!(cache.has_noise(8));
    assert!(cache.has_flip(8));
    assert!(cache.has_particles(8));
    assert!(cache.has_mesh(8));
    assert!(cache.has_guiding(8, true));

    let mut config_out = DomainConfig::default();
    assert!(cache.update_config(8, &mut config_out));
    assert_eq!(config_out, config);

    let mut density_out = vec![0.0f32; 6];
    let (mut x, mut y, mut z) = (vec![0.0f32; 6], vec![0.0f32; 6], vec![0.0f32; 6]);
    {
        let mut grids = [
            GridDescriptor::scalar("density", [3, 2, 1], &mut density_out),
            GridDescriptor::vector3("velocity", [3, 2, 1], [&mut x, &mut y, &mut z]),
        ];
        assert!(cache.update_data_structures(8, &mut grids));
    }
    assert_eq!(density_out, density);
    assert_eq!((x, y, z), (vx.clone(), vy.clone(), vz.clone()));

    let (mut gx, mut gy, mut gz) = (vec![0.0f32; 6], vec![0.0f32; 6], vec![0.0f32; 6]);
    {
        let mut guide = [GridDescriptor::vector3(
            "guidevel",
            [3, 2, 1],
            [&mut gx, &mut gy, &mut gz],
        )];
        assert!(cache.update_guiding_structures(8, true, &mut guide));
    }
    assert_eq!(gx, vx);

    let mut flip = ParticleSystem::default();
    assert!(cache.update_flip_structures(8, &mut flip));
    assert_eq!(flip.records, particles(3).records);

    let mut secondary = particles(2);
    assert!(cache.update_particle_structures(8, &mut secondary));
    assert!(secondary.is_empty());

    let mut mesh = MeshSnapshot::default();
    assert!(cache.update_mesh_structures(8, &mut mesh));
    assert_eq!(mesh, triangle_mesh());

    let flags = cache.flags();
    assert!(flags.data && flags.flip && flags.particles && flags.mesh && flags.guiding);
    assert!(!flags.noise);
    let _ = std::fs::remove_dir_all(root);
}
