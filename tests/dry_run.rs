use polarprint::{
    build_controller, ConcentricRings, Config, FileSink, JobState, Opcode, PrintJob,
};
use polarprint_communication::PacketDecoder;
use tempfile::tempdir;

#[test]
fn test_dry_run_writes_a_decodable_stream() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("print.bin");
    let sink = FileSink::create(&out).unwrap();
    let mut controller = build_controller(&Config::default(), Box::new(sink)).unwrap();

    let mut job = PrintJob::new(Box::new(ConcentricRings::two_materials(1)));
    let progress = job.run_to_completion(&mut controller).unwrap();
    assert_eq!(progress.state, JobState::Finished);

    let bytes = std::fs::read(&out).unwrap();
    let commands = PacketDecoder::new().decode(&bytes).unwrap();
    assert_eq!(commands.len(), controller.packets_sent());
    assert_eq!(commands[0].opcode, Opcode::Home);
    assert!(commands
        .iter()
        .any(|c| matches!(c.opcode, Opcode::StepMotor(m) if m.extruder_index().is_some())));
}

#[test]
fn test_dry_run_honours_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut config = Config::default();
    config.machine.max_rings = 40;
    config.machine.step_divisor = 8;
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_or_default(Some(&path)).unwrap();
    let controller =
        build_controller(&loaded, Box::new(polarprint::MemorySink::new())).unwrap();
    assert_eq!(controller.geometry().max_rings, 40);
    assert_eq!(controller.working().platform_steps_per_rotation(), 8000);
}
