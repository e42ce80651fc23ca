//! Jazz animation-graph resource: the worked example for discriminated
//! heterogeneous lists and externally counted key lists.
//!
//! Layout (little-endian, except the graph name):
//! - `version: u32` (0x04 or 0x05)
//! - `actor_count: u32` — count for the actor list at the tail
//! - graph name: big-endian UTF-16, u32 big-endian code-unit count prefix
//! - `fade_duration: f32` — version 0x05 and later only
//! - command list: u32 count, each command led by a u16 discriminator tag
//! - actor keys (ITG order), `actor_count` entries, no inline count

use tracing::debug_span;

use crate::change::{Attach, ChangeHandler};
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::fields::{check_field, ApiVersionedFields, FieldDescriptor, FieldValue};
use crate::key::{KeyOrder, ResourceKey, TgiBlock};
use crate::list::{CountEncoding, CountedTgiBlockList, DependentList, ListElement};
use crate::resource::{Resource, ResourceCore};

pub const JAZZ_VERSION_MIN: u32 = 0x04;
pub const JAZZ_VERSION_MAX: u32 = 0x05;

const TAG_PLAY: u16 = 0x0001;
const TAG_WAIT: u16 = 0x0002;
const TAG_SET_PARAMETER: u16 = 0x0003;

/// One step of an animation graph, discriminated by a leading u16 tag.
#[derive(Debug, Clone, PartialEq)]
pub enum JazzCommand {
    /// Tag 0x0001: play a clip resource.
    Play { clip: TgiBlock, loop_count: u32 },
    /// Tag 0x0002: idle for a tick count.
    Wait { ticks: u32 },
    /// Tag 0x0003: set a named parameter.
    SetParameter { param_hash: u32, value: f32 },
}

impl Attach for JazzCommand {
    fn attached(&self, handler: &ChangeHandler) -> Self {
        match self {
            JazzCommand::Play { clip, loop_count } => JazzCommand::Play {
                clip: clip.attached(handler),
                loop_count: *loop_count,
            },
            other => other.clone(),
        }
    }
}

impl ListElement for JazzCommand {
    fn read(cur: &mut ByteCursor, handler: &ChangeHandler) -> Result<Self> {
        let offset = cur.position();
        match cur.read_u16()? {
            TAG_PLAY => Ok(JazzCommand::Play {
                clip: TgiBlock::parse(cur, KeyOrder::Tgi, handler)?,
                loop_count: cur.read_u32()?,
            }),
            TAG_WAIT => Ok(JazzCommand::Wait {
                ticks: cur.read_u32()?,
            }),
            TAG_SET_PARAMETER => Ok(JazzCommand::SetParameter {
                param_hash: cur.read_u32()?,
                value: cur.read_f32()?,
            }),
            tag => Err(Error::UnknownTag {
                tag: tag as u32,
                offset,
            }),
        }
    }

    fn write(&self, cur: &mut ByteCursor) -> Result<()> {
        match self {
            JazzCommand::Play { clip, loop_count } => {
                cur.write_u16(TAG_PLAY)?;
                clip.unparse(cur)?;
                cur.write_u32(*loop_count)
            }
            JazzCommand::Wait { ticks } => {
                cur.write_u16(TAG_WAIT)?;
                cur.write_u32(*ticks)
            }
            JazzCommand::SetParameter { param_hash, value } => {
                cur.write_u16(TAG_SET_PARAMETER)?;
                cur.write_u32(*param_hash)?;
                cur.write_f32(*value)
            }
        }
    }
}

pub struct JazzGraphResource {
    core: ResourceCore,
    version: u32,
    name: String,
    /// Version 0x05 and later only.
    fade_duration: Option<f32>,
    commands: DependentList<JazzCommand>,
    actors: CountedTgiBlockList,
}

impl JazzGraphResource {
    pub fn from_stream(requested_api_version: i32, data: Vec<u8>) -> Result<Self> {
        let _span = debug_span!("JazzGraphResource::parse", len = data.len()).entered();

        let mut core = ResourceCore::new(requested_api_version);
        let handler = core.handler();
        let mut cur = ByteCursor::new(data);

        let version = cur.read_u32()?;
        if !(JAZZ_VERSION_MIN..=JAZZ_VERSION_MAX).contains(&version) {
            return Err(Error::UnsupportedVersion { version, offset: 0 });
        }

        let actor_count = cur.read_u32()?;
        let name = cur.read_string_utf16_be()?;
        let fade_duration = if version >= 0x05 {
            Some(cur.read_f32()?)
        } else {
            None
        };
        let commands = DependentList::parse(&mut cur, CountEncoding::U32, &handler)?;
        let actors = CountedTgiBlockList::parse(&mut cur, KeyOrder::Itg, actor_count, &handler)?;
        cur.expect_eof()?;

        core.store(cur.into_inner());
        Ok(Self {
            core,
            version,
            name,
            fade_duration,
            commands,
            actors,
        })
    }

    pub fn build(version: u32) -> JazzGraphBuilder {
        JazzGraphBuilder::new(version)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: String) {
        if self.name != name {
            self.name = name;
            self.core.mark_dirty();
        }
    }

    pub fn fade_duration(&self) -> Result<f32> {
        self.fade_duration.ok_or(Error::VersionGated {
            field: "FadeDuration",
            version: self.version,
        })
    }

    pub fn set_fade_duration(&mut self, v: f32) -> Result<()> {
        if self.version < 0x05 {
            return Err(Error::VersionGated {
                field: "FadeDuration",
                version: self.version,
            });
        }
        if self.fade_duration != Some(v) {
            self.fade_duration = Some(v);
            self.core.mark_dirty();
        }
        Ok(())
    }

    pub fn commands(&self) -> &DependentList<JazzCommand> {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut DependentList<JazzCommand> {
        &mut self.commands
    }

    pub fn actors(&self) -> &CountedTgiBlockList {
        &self.actors
    }

    pub fn actors_mut(&mut self) -> &mut CountedTgiBlockList {
        &mut self.actors
    }
}

impl PartialEq for JazzGraphResource {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.name == other.name
            && self.fade_duration == other.fade_duration
            && self.commands == other.commands
            && self.actors == other.actors
    }
}

impl std::fmt::Debug for JazzGraphResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JazzGraphResource")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("commands", &self.commands.len())
            .field("actors", &self.actors.len())
            .finish()
    }
}

const JAZZ_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("Version", 1),
    FieldDescriptor::new("Name", 2),
    FieldDescriptor::new("FadeDuration", 3).since(0x05),
    FieldDescriptor::new("Commands", 4),
    FieldDescriptor::new("Actors", 5),
];

impl ApiVersionedFields for JazzGraphResource {
    fn field_table() -> &'static [FieldDescriptor] {
        JAZZ_FIELDS
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn get_field(&self, name: &str) -> Result<FieldValue> {
        check_field::<Self>(name, self.version)?;
        Ok(match name {
            "Version" => FieldValue::U32(self.version),
            "Name" => FieldValue::Str(self.name.clone()),
            "FadeDuration" => FieldValue::F32(self.fade_duration.unwrap_or_default()),
            "Actors" => FieldValue::Keys(self.actors.iter().map(|b| b.key()).collect()),
            "Commands" => {
                return Err(Error::InvalidArgument(
                    "Commands is a composite field, use the typed accessor".to_string(),
                ))
            }
            _ => unreachable!(),
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()> {
        check_field::<Self>(name, self.version)?;
        match (name, &value) {
            ("Name", FieldValue::Str(v)) => self.set_name(v.clone()),
            ("FadeDuration", FieldValue::F32(v)) => self.set_fade_duration(*v)?,
            ("Actors", FieldValue::Keys(keys)) => {
                while !self.actors.is_empty() {
                    self.actors.remove(0);
                }
                for key in keys {
                    self.actors.push_key(*key);
                }
            }
            _ => {
                return Err(Error::TypeMismatch {
                    field: name.to_string(),
                    expected: "field-appropriate value",
                    found: value.type_name(),
                })
            }
        }
        Ok(())
    }
}

impl Resource for JazzGraphResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        &mut self.core
    }

    fn unparse(&self) -> Result<Vec<u8>> {
        let _span = debug_span!("JazzGraphResource::unparse").entered();

        let mut cur = ByteCursor::empty();
        cur.write_u32(self.version)?;
        // the actor list is externally counted: its count lives here
        cur.write_u32(self.actors.len() as u32)?;
        cur.write_string_utf16_be(&self.name)?;
        if self.version >= 0x05 {
            cur.write_f32(self.fade_duration.unwrap_or_default())?;
        }
        self.commands.unparse(&mut cur)?;
        self.actors.unparse(&mut cur)?;
        Ok(cur.into_inner())
    }
}

pub struct JazzGraphBuilder {
    version: u32,
    requested_api_version: i32,
    name: String,
    fade_duration: Option<f32>,
    commands: Vec<JazzCommand>,
    actors: Vec<ResourceKey>,
}

impl JazzGraphBuilder {
    fn new(version: u32) -> Self {
        Self {
            version,
            requested_api_version: 0,
            name: String::new(),
            fade_duration: None,
            commands: Vec::new(),
            actors: Vec::new(),
        }
    }

    pub fn requested_api_version(mut self, v: i32) -> Self {
        self.requested_api_version = v;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Only valid for version 0x05 and later; checked in [`finish`](Self::finish).
    pub fn fade_duration(mut self, v: f32) -> Self {
        self.fade_duration = Some(v);
        self
    }

    pub fn play(mut self, clip: ResourceKey, loop_count: u32) -> Self {
        self.commands.push(JazzCommand::Play {
            clip: TgiBlock::new(KeyOrder::Tgi, clip, &ChangeHandler::detached()),
            loop_count,
        });
        self
    }

    pub fn wait(mut self, ticks: u32) -> Self {
        self.commands.push(JazzCommand::Wait { ticks });
        self
    }

    pub fn set_parameter(mut self, param_hash: u32, value: f32) -> Self {
        self.commands.push(JazzCommand::SetParameter { param_hash, value });
        self
    }

    pub fn actor(mut self, key: ResourceKey) -> Self {
        self.actors.push(key);
        self
    }

    pub fn finish(self) -> Result<JazzGraphResource> {
        if !(JAZZ_VERSION_MIN..=JAZZ_VERSION_MAX).contains(&self.version) {
            return Err(Error::InvalidArgument(format!(
                "jazz graph version 0x{:X} out of range",
                self.version
            )));
        }
        if self.fade_duration.is_some() && self.version < 0x05 {
            return Err(Error::VersionGated {
                field: "FadeDuration",
                version: self.version,
            });
        }

        let core = ResourceCore::new(self.requested_api_version);
        let handler = core.handler();

        let mut commands = DependentList::new(CountEncoding::U32, &handler);
        for command in self.commands {
            commands.push(command);
        }
        let mut actors = CountedTgiBlockList::new(KeyOrder::Itg, &handler);
        for key in self.actors {
            actors.push_key(key);
        }

        let fade_duration = if self.version >= 0x05 {
            Some(self.fade_duration.unwrap_or_default())
        } else {
            None
        };

        Ok(JazzGraphResource {
            core,
            version: self.version,
            name: self.name,
            fade_duration,
            commands,
            actors,
        })
    }
}
