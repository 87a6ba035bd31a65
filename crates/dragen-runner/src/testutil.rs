//! Fixture resources and records shared by the unit tests.

use crate::resources::ResourceBundle;
use crate::sample::SampleRecord;
use serde_json::{json, Value};
use std::path::PathBuf;

pub const MANIFEST: &str = "/runs/230101_A0_0001_FCX/Data/SampleSheet.csv";
pub const TRUSEQ: &str = "AGATCGGAAGAGCACACGTCTGAACTCCAGTCA";

pub fn sample(index: usize, sample_id: &str, tumor: &str, normal: &str) -> SampleRecord {
    let manifest = PathBuf::from(MANIFEST);
    let dir = manifest
        .parent()
        .map(|p| p.join("ProjectX").join(sample_id))
        .unwrap_or_default();
    SampleRecord {
        index,
        project: "ProjectX".to_string(),
        sample_id: sample_id.to_string(),
        sample_name: sample_id.to_string(),
        ref_genome: "hg38".to_string(),
        tumor: tumor.to_string(),
        normal: normal.to_string(),
        sample_dir: dir,
        manifest_path: manifest,
        ..Default::default()
    }
}

pub fn dna_json() -> Value {
    json!({
        "ref_parameters": {
            "RefGenome": {"hg38": {
                "ref-dir": "/ref/hg38",
                "noiseprofile": "/ref/hg38/noise.bed",
                "pop_b_allele": "/ref/hg38/pop_af.vcf.gz",
                "sv_noiseprofile": "",
                "vc-decoy-contigs": ["chrUn", "chrEBV"]
            }},
            "target": {"hg38": {
                "exome_v1": "/beds/exome_v1.bed",
                "umi_panel": "/beds/umi_panel.bed"
            }},
            "cnvpanelofnormals": {"hg38": {"exome_v1": "/pon/exome_v1_pon.txt"}}
        },
        "adapters": {"truseq": TRUSEQ, "nextera": "CTGTCTCTTATACACATCT"},
        "scripts": {"pre": "source /opt/pre.sh", "post": "bash /opt/post.sh"},
        "samplesheet": [],
        "exome_normal_pipeline": {
            "ref-dir": "{ref-dir}",
            "fastq-file1": "{fastq-file1}",
            "fastq-file2": "{fastq-file2}",
            "RGID": "{RGID}",
            "RGSM": "{RGSM}",
            "output-directory": ".",
            "output-file-prefix": "{output-file-prefix}",
            "intermediate-results-dir": "{intermediate-results-dir}",
            "enable-variant-caller": true,
            "read-trimmers": "polyg",
            "qc-coverage-region-1": "{qc-coverage-region-1}",
            "vc-systematic-noise": "{vc-systematic-noise}",
            "sv-systematic-noise": "{sv-systematic-noise}"
        },
        "exome_tumor_pipeline": {
            "ref-dir": "{ref-dir}",
            "tumor-fastq1": "{tumor-fastq1}",
            "tumor-fastq2": "{tumor-fastq2}",
            "RGID-tumor": "{RGID-tumor}",
            "RGSM-tumor": "{RGSM-tumor}",
            "output-file-prefix": "{output-file-prefix}",
            "enable-variant-caller": true,
            "cnv-population-b-allele-vcf": "{cnv-population-b-allele-vcf}"
        },
        "exome_tumor_normal_pipeline": {
            "ref-dir": "{ref-dir}",
            "fastq-file1": "{fastq-file1}",
            "fastq-file2": "{fastq-file2}",
            "RGID": "{RGID}",
            "RGSM": "{RGSM}",
            "tumor-fastq1": "{tumor-fastq1}",
            "tumor-fastq2": "{tumor-fastq2}",
            "RGID-tumor": "{RGID-tumor}",
            "RGSM-tumor": "{RGSM-tumor}",
            "output-file-prefix": "{output-file-prefix}",
            "enable-variant-caller": true,
            "enable-sv": true,
            "vc-decoy-contigs": "{vc-decoy-contigs}"
        },
        "genome_normal_pipeline": {
            "ref-dir": "{ref-dir}",
            "fastq-file1": "{fastq-file1}",
            "fastq-file2": "{fastq-file2}",
            "output-file-prefix": "{output-file-prefix}"
        },
        "genome_tumor_pipeline": {
            "ref-dir": "{ref-dir}",
            "tumor-fastq1": "{tumor-fastq1}",
            "tumor-fastq2": "{tumor-fastq2}",
            "output-file-prefix": "{output-file-prefix}"
        },
        "umi_normal_pipeline": {
            "ref-dir": "{ref-dir}",
            "fastq-file1": "{fastq-file1}",
            "fastq-file2": "{fastq-file2}",
            "umi-fastq": "{umi-fastq}",
            "RGID": "{RGID}",
            "RGSM": "{RGSM}",
            "output-file-prefix": "{output-file-prefix}",
            "umi-enable": true,
            "umi-metrics-interval-file": "{umi-metrics-interval-file}"
        },
        "umi_tumor_alignment": {
            "ref-dir": "{ref-dir}",
            "tumor-fastq1": "{tumor-fastq1}",
            "tumor-fastq2": "{tumor-fastq2}",
            "umi-fastq": "{umi-fastq}",
            "RGID-tumor": "{RGID-tumor}",
            "RGSM-tumor": "{RGSM-tumor}",
            "output-file-prefix": "{output-file-prefix}",
            "umi-enable": true,
            "enable-map-align-output": true,
            "enable-cnv": true,
            "umi-metrics-interval-file": "{umi-metrics-interval-file}"
        },
        "umi_paired_variant_call": {
            "ref-dir": "{ref-dir}",
            "enable-variant-caller": true,
            "vc-enable-umi-solid": true,
            "vc-snp-error-cal-bed": "{vc-snp-error-cal-bed}",
            "vc-normal-sample-name": "<normal>",
            "output-file-prefix": "{output-file-prefix}"
        },
        "exome_literal_only": {
            "enable-variant-caller": true
        }
    })
}

pub fn dna_bundle() -> ResourceBundle {
    ResourceBundle::from_json(dna_json()).expect("dna fixture")
}

pub fn rna_bundle() -> ResourceBundle {
    ResourceBundle::from_json(json!({
        "ref_parameters": {"RefGenome": {"hg38": {
            "ref-dir": "/ref/hg38_rna",
            "gtf": "/ref/hg38/genes.gtf",
            "rrna-contig": ["chrM", "chrUn_GL000220v1"]
        }}},
        "adapters": {"truseq": TRUSEQ},
        "samplesheet": null,
        "rna": {
            "ref-dir": "{ref-dir}",
            "tumor-fastq1": "{tumor-fastq1}",
            "tumor-fastq2": "{tumor-fastq2}",
            "RGID-tumor": "{RGID-tumor}",
            "RGSM-tumor": "{RGSM-tumor}",
            "output-file-prefix": "{output-file-prefix}",
            "enable-rna": true,
            "annotation-file": "{annotation-file}",
            "rrna-filter-contig": "{rrna-filter-contig}"
        }
    }))
    .expect("rna fixture")
}

pub fn methylation_bundle() -> ResourceBundle {
    ResourceBundle::from_json(json!({
        "ref_parameters": {
            "RefGenome": {"hg38": {"ref-dir": "/ref/hg38_met"}},
            "target": {"hg38": {"meth_panel": "/beds/meth_panel.bed"}}
        },
        "adapters": {},
        "methylation": {
            "ref-dir": "{ref-dir}",
            "fastq-file1": "{fastq-file1}",
            "fastq-file2": "{fastq-file2}",
            "RGID": "{RGID}",
            "RGSM": "{RGSM}",
            "output-file-prefix": "{output-file-prefix}",
            "methylation-protocol": "directional",
            "qc-coverage-region-1": "{qc-coverage-region-1}"
        }
    }))
    .expect("methylation fixture")
}
