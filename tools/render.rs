use anyhow::{Context, Result};
use codecrush::{MaskingEngine, Params};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::PathBuf;

/// Offline renderer: processes a WAV file through the masking engine and
/// writes the result, optionally driven by a JSON parameter preset.
///
/// Usage: render <input.wav> <output.wav> [params.json] [seed]
fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let input = args
        .next()
        .map(PathBuf::from)
        .context("usage: render <input.wav> <output.wav> [params.json] [seed]")?;
    let output = args
        .next()
        .map(PathBuf::from)
        .context("usage: render <input.wav> <output.wav> [params.json] [seed]")?;
    let params = match args.next() {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read parameter file '{path}'"))?;
            serde_json::from_str::<Params>(&text)
                .with_context(|| format!("failed to parse parameter file '{path}'"))?
        }
        None => Params::default(),
    };
    let seed = args
        .next()
        .map(|s| s.parse::<u64>().context("seed must be an integer"))
        .transpose()?;

    let mut reader = WavReader::open(&input)
        .with_context(|| format!("failed to open input WAV '{}'", input.display()))?;
    let spec = reader.spec();
    check_input_format(&spec)?;
    let num_channels = spec.channels as usize;

    let mut engine = MaskingEngine::new(params.lines, spec.sample_rate as f32, num_channels)
        .context("failed to initialize engine")?;
    params
        .apply(&mut engine)
        .context("failed to apply parameters")?;
    if let Some(seed) = seed {
        engine.reseed(seed);
    }

    // Deinterleave into per-channel buffers.
    let mut channels: Vec<Vec<f32>> = vec![Vec::new(); num_channels];
    for (i, sample) in reader.samples::<i16>().enumerate() {
        let sample = sample?;
        channels[i % num_channels].push(sample as f32 / i16::MAX as f32);
    }
    let num_frames = channels.iter().map(Vec::len).min().unwrap_or(0);

    // Feed the latency tail through as silence so the render is not
    // truncated by the engine's one-window delay.
    let latency = engine.latency_samples();
    for ch in &mut channels {
        ch.resize(num_frames + latency, 0.0);
    }

    let (blocks, stuck_blocks) =
        run_blocks(&mut engine, &mut channels, num_frames + latency, 2048);

    let mut writer = WavWriter::create(
        &output,
        WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )
    .with_context(|| format!("failed to create output WAV '{}'", output.display()))?;

    let mut peak = 0.0f32;
    for frame in 0..num_frames {
        for ch in &channels {
            // Skip the leading latency so input and output line up.
            let v = ch[frame + latency].clamp(-1.0, 1.0);
            peak = peak.max(v.abs());
            writer.write_sample((v * i16::MAX as f32) as i16)?;
        }
    }
    writer.finalize()?;

    println!("Render summary for '{}':", input.display());
    println!("  frames processed : {}", num_frames);
    println!("  channels         : {}", num_channels);
    println!("  window lines     : {}", params.lines);
    println!("  blocks processed : {}", blocks);
    println!("  stuck blocks     : {}", stuck_blocks);
    println!("  output peak      : {:.4}", peak);
    Ok(())
}

fn check_input_format(spec: &WavSpec) -> Result<()> {
    if spec.channels == 0 {
        anyhow::bail!("input WAV declares zero channels");
    }
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        anyhow::bail!("render only supports 16-bit integer WAV input");
    }
    Ok(())
}

/// Streams `total` frames through the engine in `block`-sized chunks.
/// Returns the number of blocks processed and how many of them ended with
/// the stuck-state simulator reporting a loss.
fn run_blocks(
    engine: &mut MaskingEngine,
    channels: &mut [Vec<f32>],
    total: usize,
    block: usize,
) -> (usize, usize) {
    let mut blocks = 0usize;
    let mut stuck_blocks = 0usize;
    let mut offset = 0;
    while offset < total {
        let end = (offset + block).min(total);
        let mut slices: Vec<&mut [f32]> = channels
            .iter_mut()
            .map(|ch| &mut ch[offset..end])
            .collect();
        engine.process_block(&mut slices);
        blocks += 1;
        if engine.is_stuck() {
            stuck_blocks += 1;
        }
        offset = end;
    }
    (blocks, stuck_blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_channel_input_is_rejected() {
        let bad = WavSpec {
            channels: 0,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        assert!(check_input_format(&bad).is_err());

        let good = WavSpec { channels: 2, ..bad };
        assert!(check_input_format(&good).is_ok());

        let float = WavSpec {
            channels: 2,
            sample_format: SampleFormat::Float,
            bits_per_sample: 32,
            ..bad
        };
        assert!(check_input_format(&float).is_err());
    }

    #[test]
    fn stuck_blocks_are_counted() {
        let mut engine = MaskingEngine::new(32, 44100.0, 1).unwrap();
        engine.reseed(9);
        engine.set_packet_loss(1.0, 3.0, 3.0); // at the cap: sticks and stays
        let mut channels = vec![vec![0.1f32; 512]];
        let (blocks, stuck) = run_blocks(&mut engine, &mut channels, 512, 64);
        assert_eq!(blocks, 8);
        assert_eq!(stuck, blocks);

        let mut engine = MaskingEngine::new(32, 44100.0, 1).unwrap();
        engine.reseed(9);
        engine.set_packet_loss(0.0, 0.5, 3.0);
        let mut channels = vec![vec![0.1f32; 512]];
        let (blocks, stuck) = run_blocks(&mut engine, &mut channels, 512, 64);
        assert_eq!(blocks, 8);
        assert_eq!(stuck, 0);
    }
}
