//! File-backed avatar integration: character models, WAV lip-sync,
//! timeline files and configuration on disk.

use std::sync::Arc;
use std::time::Duration;

use ava::asset::{load_rig, rig_from_config};
use ava::config::{LipSyncConfig, RigConfig};
use ava::speech::{ManualClock, PlaybackClock};
use ava::viseme::wav::{analyze_wav, load_wav_mono, segments};
use ava::{AvatarConfig, AvatarController, AvatarError, ExpressionLabel, PhonemeTimeline};
use serde_json::json;

/// Wrap glTF JSON in a minimal GLB container.
fn glb(doc: &serde_json::Value) -> Vec<u8> {
    let mut json = serde_json::to_vec(doc).unwrap();
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    let total = 12 + 8 + json.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&0x4654_6C67u32.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&0x4E4F_534Au32.to_le_bytes());
    out.extend_from_slice(&json);
    out
}

/// A character whose head lacks some expression controls.
fn sparse_character() -> serde_json::Value {
    let targets = json!([
        "mouthSmile_Left", "mouthSmile_Right", "browInnerUp",
        "viseme_sil", "viseme_aa", "viseme_O", "viseme_U", "viseme_I", "mouthOpen"
    ]);
    json!({
        "asset": {"version": "2.0"},
        "nodes": [
            {"name": "Wolf3D_Head", "mesh": 0},
            {"name": "Wolf3D_Teeth", "mesh": 1},
            {"name": "Armature"}
        ],
        "meshes": [
            {"name": "Wolf3D_Head", "extras": {"targetNames": targets}},
            {"name": "Wolf3D_Teeth", "extras": {"targetNames": targets}}
        ]
    })
}

fn write_wav(path: &std::path::Path, channels: u16, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: 24_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

/// Tones on FFT bins 5, 20 and 45 as 16-bit PCM.
fn voiced_pcm(seconds: f32) -> Vec<i16> {
    let rate = 24_000.0f32;
    (0..(seconds * rate) as usize)
        .map(|i| {
            let v: f32 = [5.0f32, 20.0, 45.0]
                .iter()
                .map(|bin| {
                    let freq = bin * rate / 256.0;
                    (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * 0.3
                })
                .sum();
            (v * 32_767.0) as i16
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn loaded_model_animates_only_controls_it_has() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("character.glb");
    std::fs::write(&path, glb(&sparse_character())).unwrap();

    let rig_config = RigConfig {
        model_path: Some(path),
        ..RigConfig::default()
    };
    let rig = rig_from_config(&rig_config).unwrap();
    assert!(rig.teeth.is_some());
    assert!(!rig.head.has("eyeSquintLeft"));

    let mut avatar = AvatarController::paced(&AvatarConfig::default(), rig);
    avatar.submit_text("hi").unwrap();
    assert_eq!(avatar.expression(), ExpressionLabel::Happy);
    for _ in 0..120 {
        avatar.frame();
    }

    let head = &avatar.rig().head;
    let smile = head.weight("mouthSmile_Left").unwrap();
    assert!(smile > 0.8, "smile {smile}");
    assert_eq!(head.weight("eyeSquintLeft"), None);
    assert_eq!(
        avatar.rig().teeth.as_ref().unwrap().weight("mouthSmile_Left"),
        Some(smile)
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    avatar.frame();
    assert_eq!(avatar.expression(), ExpressionLabel::Neutral);
}

#[test]
fn model_without_head_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("props.glb");
    std::fs::write(
        &path,
        glb(&json!({"nodes": [{"name": "Table", "mesh": 0}], "meshes": [{"name": "Table"}]})),
    )
    .unwrap();

    let err = load_rig(&path, &RigConfig::default()).unwrap_err();
    assert!(matches!(err, AvatarError::Asset(_)));
}

#[test]
fn wav_analysis_tracks_speech_and_silence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reply.wav");
    let mut pcm = voiced_pcm(0.5);
    pcm.extend(std::iter::repeat_n(0i16, 48_000));
    write_wav(&path, 1, &pcm);

    let frames = analyze_wav(&path, &LipSyncConfig::default()).unwrap();
    let duration = frames.last().unwrap().time;
    assert!((duration - 2.5).abs() < 0.02, "duration {duration}");
    assert!(frames[..10].iter().any(|f| f.target.is_some()));
    assert!(frames.last().unwrap().target.is_none());
    assert!(!segments(&frames).is_empty());
}

#[test]
fn stereo_wav_is_mixed_to_mono() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stereo.wav");
    // Left full scale, right silent: the mix is half scale.
    write_wav(&path, 2, &[16_384, 0, -16_384, 0]);

    let (samples, rate) = load_wav_mono(&path).unwrap();
    assert_eq!(rate, 24_000);
    assert_eq!(samples, vec![0.25, -0.25]);

    let missing = analyze_wav(&dir.path().join("none.wav"), &LipSyncConfig::default());
    assert!(matches!(missing, Err(AvatarError::LipSync(_))));
}

#[tokio::test(start_paused = true)]
async fn timeline_file_drives_the_mouth() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reply.json");
    std::fs::write(
        &path,
        json!({
            "text": "hi",
            "phonemes": [
                {"phoneme": "HH", "viseme": "A", "start": 0.0, "end": 0.5},
                {"phoneme": "IY", "viseme": "B", "start": 0.6, "end": 1.0}
            ]
        })
        .to_string(),
    )
    .unwrap();
    let timeline = PhonemeTimeline::from_file(&path).unwrap();
    assert_eq!(timeline.len(), 2);

    let mut avatar = AvatarController::paced(
        &AvatarConfig::default(),
        ava::asset::standard_rig(&RigConfig::default()),
    );
    let clock = Arc::new(ManualClock::new());
    avatar
        .play_timeline(timeline, clock.clone() as Arc<dyn PlaybackClock>)
        .unwrap();

    clock.set_position(0.3);
    tokio::time::sleep(Duration::from_millis(50)).await;
    avatar.frame();
    assert!(avatar.signal().drives("viseme_aa"));

    clock.set_position(0.55);
    tokio::time::sleep(Duration::from_millis(50)).await;
    avatar.frame();
    assert!(!avatar.signal().is_active());
    assert!(avatar.is_speaking());

    clock.set_position(1.2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    avatar.frame();
    assert!(!avatar.is_speaking());
}

#[test]
fn config_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = AvatarConfig::default();
    config.voice.voice = "verse".into();
    config.lipsync.fft_size = 512;
    config.save_to_file(&path).unwrap();

    let loaded = AvatarConfig::from_file(&path).unwrap();
    assert_eq!(loaded.voice.voice, "verse");
    assert_eq!(loaded.lipsync.fft_size, 512);
    assert_eq!(loaded.speech.char_interval_ms, 70);

    std::fs::write(&path, "[blend]\nexpression_rate = 0.3\n").unwrap();
    let partial = AvatarConfig::from_file(&path).unwrap();
    assert!((partial.blend.expression_rate - 0.3).abs() < f32::EPSILON);
    assert!((partial.blend.viseme_rate - 0.5).abs() < f32::EPSILON);
}
