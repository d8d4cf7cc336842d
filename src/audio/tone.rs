use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44_100;

/// Two short sine notes played back to back, with a linear fade on each note
/// so the edges do not click.
pub struct ChimeTone {
    notes: [f32; 2],
    note_samples: usize,
    num_sample: usize,
}

impl ChimeTone {
    pub fn new(first_freq: f32, second_freq: f32, note_length: Duration) -> Self {
        let note_samples = (note_length.as_secs_f32() * SAMPLE_RATE as f32) as usize;
        Self {
            notes: [first_freq, second_freq],
            note_samples: note_samples.max(1),
            num_sample: 0,
        }
    }

    fn total_samples(&self) -> usize {
        self.note_samples * self.notes.len()
    }
}

impl Iterator for ChimeTone {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sample >= self.total_samples() {
            return None;
        }

        let note = self.num_sample / self.note_samples;
        let offset = self.num_sample % self.note_samples;
        self.num_sample += 1;

        let t = offset as f32 / SAMPLE_RATE as f32;
        let remaining = (self.note_samples - offset) as f32 / self.note_samples as f32;
        let envelope = remaining.min(offset as f32 / 441.0).min(1.0);

        Some((2.0 * PI * self.notes[note] * t).sin() * envelope * 0.25)
    }
}

impl Source for ChimeTone {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.total_samples() - self.num_sample.min(self.total_samples()))
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f32(
            self.total_samples() as f32 / SAMPLE_RATE as f32,
        ))
    }
}
