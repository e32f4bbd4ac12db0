//! Decision pipeline for one vessel
//!
//! Wires substrate, assay, posterior and calibrator together behind the
//! planner's `PlanningEnvironment` seam. Artifacts are verified once, at
//! construction; a pipeline that exists has usable signatures and a
//! usable calibrator.

use tracing::debug;

use crate::assay::context::WellContext;
use crate::assay::measurement::{Assay, Observation};
use crate::calibration::belief::BeliefFeatures;
use crate::calibration::calibrator::{Calibrator, CalibratorArtifact};
use crate::core::config::LabConfig;
use crate::core::error::{AccountingViolation, InferenceUnavailable, Result};
use crate::core::types::Hours;
use crate::inference::nuisance::NuisanceEstimator;
use crate::inference::posterior::{MechanismPosterior, PosteriorEngine};
use crate::inference::signature::SignatureSet;
use crate::planner::beam::BeamSearch;
use crate::planner::environment::{Assessment, PlanningEnvironment};
use crate::simulation::biology::BiologyTable;
use crate::simulation::substrate::Substrate;
use crate::simulation::vessel::{Vessel, VesselState};

/// Every runtime stage, built from one configuration
#[derive(Debug)]
pub struct Pipeline {
    substrate: Substrate,
    assay: Assay,
    posterior: PosteriorEngine,
    nuisance: NuisanceEstimator,
    calibrator: Calibrator,
    planner: BeamSearch,
}

impl Pipeline {
    /// Build the pipeline, refusing unversioned or unaccepted artifacts
    pub fn new(
        config: &LabConfig,
        biology: BiologyTable,
        signatures: SignatureSet,
        calibrator: CalibratorArtifact,
    ) -> Result<Self> {
        config.validate()?;
        signatures.verify(&config.artifacts)?;
        calibrator.verify(&config.artifacts)?;
        debug!(
            signatures = %signatures.version,
            calibrator = %calibrator.version,
            "Artifacts verified"
        );

        Ok(Self {
            substrate: Substrate::new(biology.clone(), config.substrate.clone(), config.base_seed),
            assay: Assay::new(biology, config.assay.clone(), config.context.clone()),
            posterior: PosteriorEngine::new(signatures, config.posterior.clone()),
            nuisance: NuisanceEstimator::new(config.context.clone(), config.assay.confluence_noise),
            calibrator: Calibrator::new(calibrator, config.calibration.clone()),
            planner: BeamSearch::new(config.planner.clone()),
        })
    }

    pub fn substrate(&self) -> &Substrate {
        &self.substrate
    }

    pub fn assay(&self) -> &Assay {
        &self.assay
    }

    pub fn posterior_engine(&self) -> &PosteriorEngine {
        &self.posterior
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn planner(&self) -> &BeamSearch {
        &self.planner
    }

    /// Posterior for one observation, context removed
    pub fn posterior(&self, observation: &Observation) -> std::result::Result<MechanismPosterior, InferenceUnavailable> {
        let nuisance = self
            .nuisance
            .estimate(observation, self.posterior.signatures().mean_trace());
        self.posterior.posterior(&observation.features, &nuisance)
    }

    /// Posterior plus calibrated belief
    pub fn assess(
        &self,
        state: &VesselState,
        observation: &Observation,
    ) -> std::result::Result<(MechanismPosterior, Assessment), InferenceUnavailable> {
        let posterior = self.posterior(observation)?;
        let dose_multiplier = state.dominant_exposure().map_or(0.0, |e| e.dose_multiplier);
        let features = BeliefFeatures::from_posterior(
            &posterior,
            observation.timepoint_h,
            dose_multiplier,
            observation.viability,
        );
        let assessment = Assessment {
            top_class: posterior.top_class,
            belief: self.calibrator.belief(features),
        };
        Ok((posterior, assessment))
    }

    /// Take the initial observation and hand the vessel to the planner
    pub fn environment(&self, mut vessel: Vessel, context: WellContext) -> VesselEnvironment<'_> {
        let observation = self.assay.observe(&mut vessel, &context);
        let start_h = vessel.state().time_h();
        VesselEnvironment {
            pipeline: self,
            vessel,
            context,
            observation,
            start_h,
            measurements: 1,
            violations: Vec::new(),
        }
    }
}

/// A vessel under planning, cheap enough to clone per beam branch
#[derive(Debug, Clone)]
pub struct VesselEnvironment<'a> {
    pipeline: &'a Pipeline,
    vessel: Vessel,
    context: WellContext,
    observation: Observation,
    start_h: Hours,
    measurements: u32,
    violations: Vec<AccountingViolation>,
}

impl<'a> VesselEnvironment<'a> {
    pub fn vessel(&self) -> &Vessel {
        &self.vessel
    }

    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    pub fn violations(&self) -> &[AccountingViolation] {
        &self.violations
    }

    pub fn posterior(&self) -> std::result::Result<MechanismPosterior, InferenceUnavailable> {
        self.pipeline.posterior(&self.observation)
    }
}

impl PlanningEnvironment for VesselEnvironment<'_> {
    fn wait(&mut self, hours: Hours) {
        if let Some(violation) = self.pipeline.substrate.advance(&mut self.vessel, hours) {
            self.violations.push(violation);
        }
        self.observation = self.pipeline.assay.observe(&mut self.vessel, &self.context);
        self.measurements += 1;
    }

    fn rescue(&mut self) {
        self.observation = self
            .pipeline
            .assay
            .observe_targeted(&mut self.vessel, &self.context);
        self.measurements += 1;
    }

    fn assess(&self) -> std::result::Result<Assessment, InferenceUnavailable> {
        self.pipeline
            .assess(self.vessel.state(), &self.observation)
            .map(|(_, assessment)| assessment)
    }

    fn elapsed_h(&self) -> Hours {
        self.vessel.state().time_h() - self.start_h
    }

    fn measurements(&self) -> u32 {
        self.measurements
    }
}
