use crate::{
    effect::StepEffect,
    error::CodecError,
    model::{Note, Step},
};

const EMPTY_PATTERN: u8 = 0x01;
const STREAM: u8 = 0x00;
const EMPTY_STEP: u8 = 0x80;
const EMPTY_RUN: u8 = 0xFF;
const EFFECT_ONLY: u8 = 0xFA;
const NOTE_OFF: u8 = 0x01;
const SHORT_FORM: u8 = 0x80;
const MAX_RUN: usize = 256;

/// Expands one pattern's RLE byte stream into exactly `step_count` steps.
///
/// Returns the steps and the number of bytes consumed.
pub fn decode_steps(bytes: &[u8], step_count: usize) -> Result<(Vec<Step>, usize), CodecError> {
    let mut cursor = StepCursor { bytes, offset: 0 };
    let mut steps = Vec::with_capacity(step_count.min(1 << 12));

    if cursor.byte()? == EMPTY_PATTERN {
        steps.resize(step_count, Step::default());
        return Ok((steps, cursor.offset));
    }

    while steps.len() < step_count {
        match cursor.byte()? {
            EMPTY_STEP => steps.push(Step::default()),
            EMPTY_RUN => {
                let run = usize::from(cursor.byte()?) + 1;
                let run = run.min(step_count - steps.len());
                steps.resize(steps.len() + run, Step::default());
            }
            EFFECT_ONLY => {
                let code = cursor.byte()?;
                let param = cursor.byte()?;
                steps.push(Step {
                    effect: StepEffect::from_bytes(code, param),
                    ..Step::default()
                });
            }
            byte if byte & SHORT_FORM != 0 => {
                let instrument = cursor.byte()?;
                steps.push(Step {
                    note: Some(note_from_byte(byte & !SHORT_FORM)),
                    instrument: (instrument != 0).then_some(instrument),
                    effect: None,
                });
            }
            byte => {
                let instrument = cursor.byte()?;
                let code = cursor.byte()?;
                let param = cursor.byte()?;
                steps.push(Step {
                    note: (byte != 0).then(|| note_from_byte(byte)),
                    instrument: (instrument != 0).then_some(instrument),
                    effect: StepEffect::from_bytes(code, param),
                });
            }
        }
    }

    Ok((steps, cursor.offset))
}

/// Compresses one pattern into the RLE grammar read by [`decode_steps`].
pub fn encode_steps(steps: &[Step]) -> Result<Vec<u8>, CodecError> {
    if steps.iter().all(Step::is_empty) {
        return Ok(vec![EMPTY_PATTERN]);
    }

    let mut out = vec![STREAM];
    let mut pending_empty = 0_usize;
    for step in steps {
        if step.is_empty() {
            pending_empty += 1;
            continue;
        }
        flush_empty_run(&mut out, pending_empty);
        pending_empty = 0;
        encode_step(&mut out, step)?;
    }
    flush_empty_run(&mut out, pending_empty);

    Ok(out)
}

fn flush_empty_run(out: &mut Vec<u8>, mut count: usize) {
    while count > 0 {
        if count == 1 {
            out.push(EMPTY_STEP);
            return;
        }
        let run = count.min(MAX_RUN);
        // run is at least 2 and at most 256
        out.extend_from_slice(&[EMPTY_RUN, (run - 1) as u8]);
        count -= run;
    }
}

fn encode_step(out: &mut Vec<u8>, step: &Step) -> Result<(), CodecError> {
    let note = step.note.map(note_to_byte).transpose()?;
    let instrument = step.instrument.unwrap_or(0);

    match (note, step.effect) {
        (Some(note), None) if has_short_form(note) => {
            out.extend_from_slice(&[note | SHORT_FORM, instrument]);
        }
        (None, Some(effect)) if step.instrument.is_none() => {
            out.extend_from_slice(&[EFFECT_ONLY, effect.kind.to_byte(), effect.param]);
        }
        (note, effect) => {
            let (code, param) = effect.map_or((0, 0), |effect| (effect.kind.to_byte(), effect.param));
            out.extend_from_slice(&[note.unwrap_or(0), instrument, code, param]);
        }
    }
    Ok(())
}

/// Short-form note bytes that would read back as a control byte.
fn has_short_form(note: u8) -> bool {
    !matches!(note | SHORT_FORM, EFFECT_ONLY | EMPTY_RUN | EMPTY_STEP)
}

fn note_from_byte(byte: u8) -> Note {
    if byte <= NOTE_OFF {
        Note::Off
    } else {
        Note::On(byte)
    }
}

fn note_to_byte(note: Note) -> Result<u8, CodecError> {
    match note {
        Note::Off => Ok(NOTE_OFF),
        Note::On(semitone) if (2..SHORT_FORM).contains(&semitone) => Ok(semitone),
        Note::On(semitone) => Err(CodecError::limit(
            "note semitone",
            usize::from(semitone),
            usize::from(SHORT_FORM - 1),
        )),
    }
}

struct StepCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl StepCursor<'_> {
    fn byte(&mut self) -> Result<u8, CodecError> {
        let byte = self
            .bytes
            .get(self.offset)
            .copied()
            .ok_or_else(|| CodecError::bounds("step data", self.offset as u64, 1))?;
        self.offset += 1;
        Ok(byte)
    }
}
