//! The configuration value a test case customizes before it runs.
//!
//! A [`Builder`] is never mutated in place by anyone but its owner: every
//! customization consumes it and hands back the next value, and the runner
//! only ever sees the frozen [`Plan`] it turns into.

use std::{fmt, sync::Arc};

use rand::Rng;
use serde_json::json;

use crate::{
    predicate::Predicate,
    resource::{Beat, Object},
};

/// Length of a generated suffix. 36^10 possible values keeps collisions
/// between concurrently running cases out of reach.
pub const SUFFIX_LEN: usize = 10;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A random string of lowercase letters and digits, safe to embed in any
/// object name.
pub fn random_lowercase(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())]))
        .collect()
}

/// Generates a DNS-1123 safe, collision resistant suffix for one run.
pub fn generate_suffix() -> String {
    random_lowercase(SUFFIX_LEN)
}

/// A test-supplied transformation.
pub type Customization = Box<dyn FnOnce(Builder) -> Builder + Send>;

/// Boxes a closure as a [`Customization`].
pub fn customization<F>(f: F) -> Customization
where
    F: FnOnce(Builder) -> Builder + Send + 'static,
{
    Box::new(f)
}

#[derive(Clone)]
pub struct Builder {
    beat: Beat,
    companions: Vec<Beat>,
    objects: Vec<Object>,
    suffix: String,
    roles: Vec<String>,
    validations: Vec<Predicate>,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("beat", &self.beat.key())
            .field(
                "companions",
                &self.companions.iter().map(Beat::key).collect::<Vec<_>>(),
            )
            .field(
                "objects",
                &self.objects.iter().map(Object::key).collect::<Vec<_>>(),
            )
            .field("suffix", &self.suffix)
            .field("roles", &self.roles)
            .field("validations", &self.validations)
            .finish()
    }
}

impl Builder {
    pub fn new(beat: Beat, objects: Vec<Object>, suffix: impl Into<String>) -> Self {
        Self {
            beat,
            companions: Vec::new(),
            objects,
            suffix: suffix.into(),
            roles: Vec::new(),
            validations: Vec::new(),
        }
    }

    pub fn beat(&self) -> &Beat {
        &self.beat
    }

    /// Beats deployed next to the primary one.
    pub fn companions(&self) -> &[Beat] {
        &self.companions
    }

    /// The primary beat followed by its companions.
    pub fn beats(&self) -> impl Iterator<Item = &Beat> {
        std::iter::once(&self.beat).chain(&self.companions)
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn validations(&self) -> &[Predicate] {
        &self.validations
    }

    /// Binds every beat's service account to each cluster role. Roles already
    /// attached are not attached twice.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for role in roles {
            let role = role.into();
            if !self.roles.contains(&role) {
                self.roles.push(role);
            }
        }
        self
    }

    #[must_use]
    pub fn with_validations(mut self, validations: impl IntoIterator<Item = Predicate>) -> Self {
        self.validations.extend(validations);
        self
    }

    /// Adds objects owned by the test case. Namespaced objects without a
    /// namespace are placed next to the beat. Names are kept as given, since
    /// validations may already refer to them; see
    /// [`LoggingTestPod`](crate::beat::LoggingTestPod) for names that stay
    /// unique across runs.
    #[must_use]
    pub fn with_additional_objects(mut self, objects: impl IntoIterator<Item = Object>) -> Self {
        let namespace = self.beat.metadata.namespace.clone();
        self.objects.extend(objects.into_iter().map(|mut object| {
            if object.metadata.namespace.is_none() && !object.is_cluster_scoped() {
                object.metadata.namespace.clone_from(&namespace);
            }
            object
        }));
        self
    }

    #[must_use]
    pub fn with_companions(mut self, beats: impl IntoIterator<Item = Beat>) -> Self {
        self.companions.extend(beats);
        self
    }

    #[must_use]
    pub fn map_beat(mut self, f: impl FnOnce(&mut Beat)) -> Self {
        f(&mut self.beat);
        self
    }

    /// Runs `f` on every companion beat.
    #[must_use]
    pub fn map_companions(mut self, mut f: impl FnMut(&mut Beat)) -> Self {
        self.companions.iter_mut().for_each(&mut f);
        self
    }

    #[must_use]
    pub fn customize(self, f: impl FnOnce(Self) -> Self) -> Self {
        f(self)
    }

    /// Applies `customizations` in order; each one sees what the previous ones
    /// did.
    #[must_use]
    pub fn apply_all(self, customizations: impl IntoIterator<Item = Customization>) -> Self {
        customizations
            .into_iter()
            .fold(self, |builder, customization| customization(builder))
    }

    /// One `ClusterRoleBinding` per attached role.
    pub fn role_bindings(&self) -> Vec<Object> {
        self.beats()
            .flat_map(|beat| self.roles.iter().map(move |role| role_binding(beat, role)))
            .collect()
    }

    /// Freezes the builder. Apply order: the recipe's and the test's objects,
    /// companion beats, role bindings, then the primary beat.
    pub fn into_plan(self) -> Result<Plan, serde_json::Error> {
        let primary = self.beat.to_object()?;
        let bindings = self.role_bindings();
        let mut auxiliaries = self.objects;
        for companion in &self.companions {
            auxiliaries.push(companion.to_object()?);
        }
        auxiliaries.extend(bindings);

        Ok(Plan {
            auxiliaries,
            primary,
            predicates: self.validations.into(),
        })
    }
}

fn role_binding(beat: &Beat, role: &str) -> Object {
    let mut binding = Object::new(
        "rbac.authorization.k8s.io/v1",
        "ClusterRoleBinding",
        format!("{}-{}", beat.name(), role),
    );
    binding.data.insert(
        "subjects".to_owned(),
        json!([{
            "kind": "ServiceAccount",
            "name": beat.service_account_name().unwrap_or("default"),
            "namespace": beat.namespace().unwrap_or("default"),
        }]),
    );
    binding.data.insert(
        "roleRef".to_owned(),
        json!({
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "ClusterRole",
            "name": role,
        }),
    );
    binding
}

/// What the runner executes: objects in apply order and the predicates that
/// decide the verdict, both read-only.
#[derive(Clone, Debug)]
pub struct Plan {
    pub auxiliaries: Vec<Object>,
    pub primary: Object,
    pub predicates: Arc<[Predicate]>,
}

impl Plan {
    /// Every object, auxiliaries first and the primary resource last.
    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.auxiliaries.iter().chain(std::iter::once(&self.primary))
    }
}
