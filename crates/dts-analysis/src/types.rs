//! The property-binding catalogue.
//!
//! A [`PropertyBinding`] is a declarative rule for one property name
//! (or name pattern): the value types it accepts, whether it is
//! required, its enumerated values, and an optional additional check
//! run after the type checks pass. The [`TypeCatalogue`] registers
//! bindings and drives validation of a merged tree.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::Config;
use crate::FileDiagnostic;
use crate::tree::DeviceTree;
use crate::tree::Node;
use crate::tree::NodeProperty;
use crate::validation;

/// The value types a property can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// No value (`prop;`).
    Empty,
    /// A single 32-bit cell.
    U32,
    /// A 64-bit value spelled as two cells.
    U64,
    /// A single string.
    String,
    /// An arbitrary cell array.
    PropEncodedArray,
    /// One or more strings.
    StringList,
    /// A bytestring.
    ByteString,
    /// Anything; used for properties whose shape is not known.
    Unknown,
}

/// One slot of a type specification: the set of acceptable types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSlot(Vec<PropertyType>);

impl TypeSlot {
    /// Constructs a slot accepting a single type.
    pub fn single(ty: PropertyType) -> Self {
        Self(vec![ty])
    }

    /// Constructs a slot accepting any of the given types.
    pub fn of(types: &[PropertyType]) -> Self {
        Self(types.to_vec())
    }

    /// Gets the acceptable types of the slot.
    pub fn types(&self) -> &[PropertyType] {
        &self.0
    }

    /// Determines whether the slot accepts a value of the given type.
    ///
    /// A string-list slot accepts strings; a property-encoded-array
    /// slot accepts `u32` and `u64` cells; `Unknown` accepts anything.
    pub fn accepts(&self, actual: PropertyType) -> bool {
        self.0.iter().any(|slot| match slot {
            PropertyType::StringList => matches!(
                actual,
                PropertyType::String | PropertyType::StringList
            ),
            PropertyType::PropEncodedArray => matches!(
                actual,
                PropertyType::U32 | PropertyType::U64 | PropertyType::PropEncodedArray
            ),
            PropertyType::Unknown => true,
            other => *other == actual,
        })
    }

    /// Determines whether this is a string-list slot.
    pub fn is_string_list(&self) -> bool {
        self.0.contains(&PropertyType::StringList)
    }
}

/// How strongly a binding wants its property present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementLevel {
    /// The property must be present.
    Required,
    /// The property may be present.
    Optional,
    /// The property must be absent.
    Omitted,
}

/// The requirement of a binding: a fixed level or a function of the
/// owning node.
#[derive(Clone)]
pub enum Requirement {
    /// A fixed level.
    Level(RequirementLevel),
    /// A level computed from the owning node.
    ///
    /// The function is pure: it may read the node but produces no
    /// diagnostics and mutates nothing.
    Computed(Arc<dyn Fn(&Node) -> RequirementLevel + Send + Sync>),
}

impl Requirement {
    /// Evaluates the requirement for the given node.
    pub fn eval(&self, node: &Node) -> RequirementLevel {
        match self {
            Self::Level(level) => *level,
            Self::Computed(f) => f(node),
        }
    }
}

impl fmt::Debug for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level(level) => write!(f, "{level:?}"),
            Self::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// The name a binding matches: a literal or a pattern.
#[derive(Debug, Clone)]
pub enum BindingName {
    /// An exact property name.
    Exact(String),
    /// A name pattern.
    Pattern(Regex),
}

impl BindingName {
    /// Determines whether the given property name matches.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == name,
            Self::Pattern(pattern) => pattern.is_match(name),
        }
    }
}

impl fmt::Display for BindingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(exact) => write!(f, "{exact}"),
            Self::Pattern(pattern) => write!(f, "{pattern}"),
        }
    }
}

/// The context handed to an additional check.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    /// The merged tree.
    pub tree: &'a DeviceTree,
    /// The node owning the property.
    pub node: &'a Node,
    /// The property under validation.
    pub property: &'a NodeProperty,
}

/// An additional check run after the type checks of a binding pass.
///
/// Checks are pure: tree in, diagnostics out.
pub type AdditionalCheck =
    Arc<dyn for<'a> Fn(&CheckContext<'a>) -> Vec<FileDiagnostic> + Send + Sync>;

/// A declarative rule for one property name.
#[derive(Clone)]
pub struct PropertyBinding {
    /// The name or pattern the binding matches.
    name: BindingName,
    /// The ordered type slots of the property value.
    type_spec: Vec<TypeSlot>,
    /// Whether the single slot repeats over every value.
    list: bool,
    /// The requirement of the property.
    requirement: Requirement,
    /// The enumerated values, for string properties with a fixed set.
    values: Option<Vec<String>>,
    /// The default value, shipped to presentation layers verbatim.
    default: Option<String>,
    /// Documentation, shipped to presentation layers verbatim.
    doc: Option<String>,
    /// Whether use of the property is deprecated.
    deprecated: bool,
    /// The additional check, if any.
    check: Option<AdditionalCheck>,
}

impl fmt::Debug for PropertyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyBinding")
            .field("name", &self.name)
            .field("type_spec", &self.type_spec)
            .field("list", &self.list)
            .field("requirement", &self.requirement)
            .field("deprecated", &self.deprecated)
            .finish_non_exhaustive()
    }
}

impl PropertyBinding {
    /// Constructs an optional binding for an exact property name.
    pub fn new(name: impl Into<String>, type_spec: Vec<TypeSlot>) -> Self {
        Self {
            name: BindingName::Exact(name.into()),
            type_spec,
            list: false,
            requirement: Requirement::Level(RequirementLevel::Optional),
            values: None,
            default: None,
            doc: None,
            deprecated: false,
            check: None,
        }
    }

    /// Constructs an optional binding for a name pattern.
    pub fn pattern(pattern: Regex, type_spec: Vec<TypeSlot>) -> Self {
        Self {
            name: BindingName::Pattern(pattern),
            ..Self::new(String::new(), type_spec)
        }
    }

    /// Marks the single type slot as repeating over every value.
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    /// Sets the requirement level to required.
    pub fn required(mut self) -> Self {
        self.requirement = Requirement::Level(RequirementLevel::Required);
        self
    }

    /// Sets the requirement level to omitted.
    pub fn omitted(mut self) -> Self {
        self.requirement = Requirement::Level(RequirementLevel::Omitted);
        self
    }

    /// Computes the requirement from the owning node.
    pub fn required_when(
        mut self,
        f: impl Fn(&Node) -> RequirementLevel + Send + Sync + 'static,
    ) -> Self {
        self.requirement = Requirement::Computed(Arc::new(f));
        self
    }

    /// Sets the enumerated values of the property.
    pub fn with_values(mut self, values: &[&str]) -> Self {
        self.values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Sets the default value of the property.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Sets the documentation of the property.
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Marks the property as deprecated.
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Sets the additional check of the binding.
    pub fn with_check(
        mut self,
        check: impl for<'a> Fn(&CheckContext<'a>) -> Vec<FileDiagnostic> + Send + Sync + 'static,
    ) -> Self {
        self.check = Some(Arc::new(check));
        self
    }

    /// Gets the name the binding matches.
    pub fn name(&self) -> &BindingName {
        &self.name
    }

    /// Gets the type slots of the binding.
    pub fn type_spec(&self) -> &[TypeSlot] {
        &self.type_spec
    }

    /// Determines whether the single slot repeats over every value.
    pub fn is_list(&self) -> bool {
        self.list
    }

    /// Gets the requirement of the binding.
    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// Gets the enumerated values, if any.
    pub fn values(&self) -> Option<&[String]> {
        self.values.as_deref()
    }

    /// Gets the default value, if any.
    pub fn default(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Gets the documentation, if any.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Determines whether use of the property is deprecated.
    pub fn is_deprecated(&self) -> bool {
        self.deprecated
    }

    /// Gets the additional check, if any.
    pub fn check(&self) -> Option<&AdditionalCheck> {
        self.check.as_ref()
    }
}

/// A registry of property bindings.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalogue {
    /// The registered bindings, in registration order.
    bindings: Vec<PropertyBinding>,
}

impl TypeCatalogue {
    /// Constructs an empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a binding.
    pub fn register(&mut self, binding: PropertyBinding) {
        self.bindings.push(binding);
    }

    /// Gets the registered bindings, in registration order.
    pub fn bindings(&self) -> &[PropertyBinding] {
        &self.bindings
    }

    /// Validates a merged tree against the catalogue.
    pub fn validate(&self, tree: &DeviceTree, config: &Config) -> Vec<FileDiagnostic> {
        validation::validate(self, tree, config)
    }

    /// Constructs the catalogue of devicetree standard bindings.
    pub fn standard() -> Self {
        use PropertyType::*;

        let mut catalogue = Self::new();
        catalogue.register(
            PropertyBinding::new("compatible", vec![TypeSlot::single(StringList)])
                .with_doc("Implemented programming models, most specific first."),
        );
        catalogue.register(
            PropertyBinding::new("model", vec![TypeSlot::single(String)])
                .with_doc("Manufacturer,model of the device."),
        );
        catalogue.register(PropertyBinding::new(
            "phandle",
            vec![TypeSlot::single(U32)],
        ));
        catalogue.register(
            PropertyBinding::new("status", vec![TypeSlot::single(String)])
                .with_values(&["okay", "disabled", "reserved", "fail", "fail-sss"])
                .with_default("okay")
                .with_doc("Operational status of the device."),
        );
        catalogue.register(
            PropertyBinding::new("#address-cells", vec![TypeSlot::single(U32)])
                .with_default("2"),
        );
        catalogue.register(
            PropertyBinding::new("#size-cells", vec![TypeSlot::single(U32)]).with_default("1"),
        );
        catalogue.register(
            PropertyBinding::new("reg", vec![TypeSlot::single(PropEncodedArray)])
                .list()
                .required_when(|node| {
                    // A node with a unit address describes an
                    // addressable device.
                    if node.name.contains('@') {
                        RequirementLevel::Required
                    } else {
                        RequirementLevel::Optional
                    }
                }),
        );
        catalogue.register(PropertyBinding::new(
            "virtual-reg",
            vec![TypeSlot::single(U32)],
        ));
        catalogue.register(
            PropertyBinding::new("ranges", vec![TypeSlot::of(&[Empty, PropEncodedArray])])
                .list(),
        );
        catalogue.register(
            PropertyBinding::new(
                "dma-ranges",
                vec![TypeSlot::of(&[Empty, PropEncodedArray])],
            )
            .list(),
        );
        catalogue.register(PropertyBinding::new(
            "dma-coherent",
            vec![TypeSlot::single(Empty)],
        ));
        catalogue.register(
            PropertyBinding::new("name", vec![TypeSlot::single(String)]).deprecated(),
        );
        catalogue.register(
            PropertyBinding::new("device_type", vec![TypeSlot::single(String)]).deprecated(),
        );
        catalogue.register(
            PropertyBinding::new("interrupts", vec![TypeSlot::single(PropEncodedArray)]).list(),
        );
        catalogue.register(PropertyBinding::new(
            "interrupt-parent",
            vec![TypeSlot::single(U32)],
        ));
        catalogue.register(
            PropertyBinding::new(
                "interrupts-extended",
                vec![TypeSlot::single(PropEncodedArray)],
            )
            .list()
            .with_check(|ctx| validation::check_interrupts_extended(ctx)),
        );
        catalogue.register(PropertyBinding::new(
            "#interrupt-cells",
            vec![TypeSlot::single(U32)],
        ));
        catalogue.register(PropertyBinding::new(
            "interrupt-controller",
            vec![TypeSlot::single(Empty)],
        ));
        catalogue.register(
            PropertyBinding::new(
                "interrupt-map",
                vec![TypeSlot::single(PropEncodedArray)],
            )
            .list(),
        );
        catalogue.register(
            PropertyBinding::new(
                "interrupt-map-mask",
                vec![TypeSlot::single(PropEncodedArray)],
            )
            .list(),
        );
        catalogue.register(PropertyBinding::pattern(
            Regex::new(r"^#.+-cells$").expect("pattern should compile"),
            vec![TypeSlot::single(U32)],
        ));
        catalogue.register(
            PropertyBinding::pattern(
                Regex::new(r"^.+-names$").expect("pattern should compile"),
                vec![TypeSlot::single(StringList)],
            ),
        );
        catalogue
    }
}
