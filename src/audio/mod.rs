//! ALSA 마스터 볼륨 (`amixer`)

use tokio::process::Command;

/// `volume up`/`down` 한 번의 변화량 (%)
pub const VOLUME_STEP: u8 = 5;

const CONTROL: &str = "Master";

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("amixer failed: {0}")]
    Command(String),

    #[error("no playback controls found in amixer output")]
    NoPlayback,

    #[error("volume must be a number between 0 and 100")]
    InvalidLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume {
    /// 0 ~ 100
    pub level: u8,
    pub muted: bool,
}

impl std::fmt::Display for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.muted {
            write!(f, "{}% (muted)", self.level)
        } else {
            write!(f, "{}%", self.level)
        }
    }
}

/// CLI 인자 검증: 0..=100 정수
pub fn parse_level(text: &str) -> Result<u8, AudioError> {
    match text.trim().parse::<u8>() {
        Ok(level) if level <= 100 => Ok(level),
        _ => Err(AudioError::InvalidLevel),
    }
}

/// 현재 값에서 `delta`만큼 이동, 0..=100으로 자른다
pub fn step(level: u8, delta: i16) -> u8 {
    (i16::from(level) + delta).clamp(0, 100) as u8
}

/// `amixer sget Master` 출력에서 첫 Playback 채널의 `[NN%]`와 `[on|off]`
pub fn parse_amixer_output(output: &str) -> Result<Volume, AudioError> {
    for line in output.lines().filter(|l| l.contains("Playback")) {
        let brackets: Vec<&str> = line
            .split('[')
            .skip(1)
            .filter_map(|part| part.split_once(']').map(|(inner, _)| inner))
            .collect();

        let Some(level) = brackets
            .iter()
            .find_map(|b| b.strip_suffix('%').and_then(|n| n.parse::<u8>().ok()))
        else {
            continue;
        };
        let muted = brackets.iter().any(|b| *b == "off");
        return Ok(Volume { level, muted });
    }
    Err(AudioError::NoPlayback)
}

/// `amixer` 실행기. 기본은 `sudo amixer`.
#[derive(Debug, Clone)]
pub struct Mixer {
    command: Vec<String>,
}

impl Default for Mixer {
    fn default() -> Self {
        Self {
            command: vec!["sudo".into(), "amixer".into()],
        }
    }
}

impl Mixer {
    pub fn with_command(command: Vec<String>) -> Self {
        Self { command }
    }

    async fn run(&self, args: &[&str]) -> Result<String, AudioError> {
        let (program, head) = self
            .command
            .split_first()
            .ok_or_else(|| AudioError::Command("empty command".into()))?;
        let output = Command::new(program)
            .args(head)
            .args(args)
            .output()
            .await
            .map_err(|e| AudioError::Command(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AudioError::Command(format!("{} {}", output.status, stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn get(&self) -> Result<Volume, AudioError> {
        parse_amixer_output(&self.run(&["sget", CONTROL]).await?)
    }

    pub async fn set(&self, level: u8) -> Result<(), AudioError> {
        let level = format!("{}%", level.min(100));
        self.run(&["-q", "sset", CONTROL, &level]).await.map(|_| ())
    }

    pub async fn mute(&self) -> Result<(), AudioError> {
        self.run(&["-q", "sset", CONTROL, "mute"]).await.map(|_| ())
    }

    pub async fn unmute(&self) -> Result<(), AudioError> {
        self.run(&["-q", "sset", CONTROL, "unmute"]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONO_ON: &str = "Simple mixer control 'Master',0\n  \
Capabilities: pvolume pvolume-joined pswitch pswitch-joined\n  \
Playback channels: Mono\n  \
Limits: Playback 0 - 87\n  \
Mono: Playback 70 [80%] [-12.75dB] [on]\n";

    #[test]
    fn test_parse_mono_unmuted() {
        assert_eq!(parse_amixer_output(MONO_ON).unwrap(), Volume { level: 80, muted: false });
    }

    #[test]
    fn test_parse_muted() {
        let out = "  Playback channels: Mono\n  Mono: Playback 0 [0%] [-65.25dB] [off]\n";
        assert_eq!(parse_amixer_output(out).unwrap(), Volume { level: 0, muted: true });
    }

    #[test]
    fn test_parse_stereo_uses_first_channel() {
        let out = "  Limits: Playback 0 - 65536\n  \
Front Left: Playback 52428 [80%] [on]\n  \
Front Right: Playback 13107 [20%] [on]\n";
        assert_eq!(parse_amixer_output(out).unwrap().level, 80);
    }

    #[test]
    fn test_parse_full_volume() {
        let out = "  Mono: Playback 87 [100%] [0.00dB] [on]\n";
        assert_eq!(parse_amixer_output(out).unwrap().level, 100);
    }

    #[test]
    fn test_parse_capture_only_is_error() {
        let out = "Simple mixer control 'Capture',0\n  Mono: Capture 48 [76%] [12.00dB]\n";
        assert!(matches!(parse_amixer_output(out), Err(AudioError::NoPlayback)));
    }

    #[test]
    fn test_level_and_step() {
        assert_eq!(parse_level("55").unwrap(), 55);
        assert!(parse_level("101").is_err());
        assert!(parse_level("-1").is_err());
        assert!(parse_level("loud").is_err());
        assert_eq!(step(98, 5), 100);
        assert_eq!(step(3, -5), 0);
        assert_eq!(step(50, 5), 55);
    }

    #[test]
    fn test_volume_display() {
        assert_eq!(Volume { level: 40, muted: true }.to_string(), "40% (muted)");
        assert_eq!(Volume { level: 40, muted: false }.to_string(), "40%");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_mixer_reads_command_output() {
        let tmp = tempfile::tempdir().unwrap();
        let sample = tmp.path().join("amixer.txt");
        std::fs::write(&sample, MONO_ON).unwrap();
        let script = format!("cat '{}'", sample.display());
        let mixer = Mixer::with_command(vec!["sh".into(), "-c".into(), script, "sh".into()]);
        assert_eq!(mixer.get().await.unwrap().level, 80);

        let failing = Mixer::with_command(vec!["false".into()]);
        assert!(matches!(failing.set(10).await, Err(AudioError::Command(_))));
    }
}
