//! Knowledge-base documents.
//!
//! Two sources feed ingestion:
//!
//! - the bundled healthcare sample corpus ([`builtin_documents`]), and
//! - an optional directory of Markdown / plain-text files
//!   ([`scan_directory`]), filtered by `[corpus]` include/exclude globs.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::models::SourceDocument;

/// Every document the `[corpus]` section selects, built-ins first.
pub fn load_documents(config: &CorpusConfig) -> Result<Vec<SourceDocument>> {
    let mut docs = Vec::new();
    if config.include_builtin {
        docs.extend(builtin_documents());
    }
    if let Some(root) = &config.root {
        let found = scan_directory(root, &config.include_globs, &config.exclude_globs)?;
        tracing::info!(root = %root.display(), documents = found.len(), "scanned corpus directory");
        docs.extend(found);
    }
    Ok(docs)
}

/// Read matching files under `root`, sorted by relative path.
pub fn scan_directory(
    root: &Path,
    include_globs: &[String],
    exclude_globs: &[String],
) -> Result<Vec<SourceDocument>> {
    if !root.exists() {
        bail!("corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(include_globs)?;

    let mut excludes = vec!["**/.git/**".to_string(), "**/target/**".to_string()];
    excludes.extend(exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let body = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if body.trim().is_empty() {
            tracing::debug!(path = %rel_str, "skipping empty file");
            continue;
        }
        docs.push(file_document(relative, &rel_str, body));
    }

    docs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(docs)
}

fn file_document(relative: &Path, rel_str: &str, body: String) -> SourceDocument {
    // A leading Markdown heading names the document; otherwise the file stem.
    let heading = body
        .lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.trim().strip_prefix("# "))
        .map(|t| t.trim().to_string());
    let title = heading.unwrap_or_else(|| {
        relative
            .file_stem()
            .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
            .unwrap_or_else(|| rel_str.to_string())
    });
    let category = relative
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "general".to_string());

    SourceDocument {
        id: format!("file:{}", rel_str),
        title,
        source: rel_str.to_string(),
        category,
        body,
        summary: None,
        tags: Vec::new(),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

fn slug(title: &str) -> String {
    let mut out = String::new();
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn builtin(
    title: &str,
    source: &str,
    category: &str,
    body: &str,
    summary: Option<&str>,
    tags: &[&str],
) -> SourceDocument {
    SourceDocument {
        id: format!("builtin:{}", slug(title)),
        title: title.to_string(),
        source: source.to_string(),
        category: category.to_string(),
        body: body.to_string(),
        summary: summary.map(str::to_string),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

/// The bundled healthcare sample corpus.
pub fn builtin_documents() -> Vec<SourceDocument> {
    vec![
        builtin(
            "Diabetes Symptoms and Management",
            "Healthcare Guidelines",
            "diabetes",
            "Diabetes is a chronic condition that affects how your body turns food into energy. Common symptoms include frequent urination, increased thirst, extreme hunger, unexplained weight loss, fatigue, blurred vision, slow-healing sores, and frequent infections. Management involves monitoring blood sugar, healthy eating, regular exercise, and medication when prescribed by healthcare providers.",
            None,
            &["symptoms"],
        ),
        builtin(
            "Blood Pressure Monitoring at Home",
            "Cardiovascular Health Guide",
            "cardiovascular",
            "Home blood pressure monitoring is an important part of managing cardiovascular health. Use a validated automatic monitor, sit quietly for 5 minutes before measuring, place the cuff on your upper arm at heart level, take multiple readings and average them, and record readings in a log. Normal blood pressure is typically below 120/80 mmHg.",
            None,
            &["monitoring"],
        ),
        builtin(
            "Emergency Symptoms - When to Seek Help",
            "Emergency Medicine Guidelines",
            "emergency",
            "Certain symptoms require immediate medical attention. Chest pain, especially if severe, crushing, or accompanied by shortness of breath, nausea, or pain radiating to your arm or jaw, can indicate a heart attack. Sudden severe headache, confusion, trouble walking, and vision problems can indicate a stroke. Call emergency services immediately for these symptoms.",
            None,
            &["symptoms"],
        ),
        builtin(
            "Stress Management and Mental Health",
            "Mental Health Resources",
            "mental_health",
            "Effective stress management is crucial for overall health. Techniques include regular exercise, deep breathing exercises, meditation, getting adequate sleep, maintaining a healthy diet, limiting caffeine and alcohol, and seeking professional help when needed. It's important to identify stress triggers and develop healthy coping mechanisms.",
            None,
            &["management"],
        ),
        builtin(
            "Exercise Benefits for Health",
            "Physical Activity Guidelines",
            "lifestyle",
            "Regular exercise provides numerous health benefits including improved cardiovascular health, stronger muscles and bones, better mental health, weight management, improved sleep, increased energy, reduced risk of chronic diseases, and enhanced immune function. Aim for at least 150 minutes of moderate exercise per week.",
            None,
            &["exercise"],
        ),
        builtin(
            "Sleep and Health",
            "Sleep Medicine Research",
            "lifestyle",
            "Quality sleep is essential for health and well-being. Adults typically need 7-9 hours of sleep per night. Signs of adequate sleep include feeling rested upon waking, maintaining energy throughout the day, not needing caffeine to function, and falling asleep within 15-20 minutes of going to bed. Poor sleep can affect mood, cognitive function, and physical health.",
            None,
            &["sleep"],
        ),
        builtin(
            "Preventive Healthcare Guidelines",
            "Preventive Medicine Standards",
            "prevention",
            "Preventive healthcare helps catch health issues early and maintain wellness. Most healthy adults should get physical exams every 1-3 years, with frequency varying based on age, health status, and risk factors. Adults over 50 may need annual exams, while younger adults with no health issues might only need exams every 2-3 years.",
            None,
            &["guidelines"],
        ),
        builtin(
            "First Aid Essentials",
            "First Aid Training Manual",
            "emergency",
            "A basic first aid kit should contain adhesive bandages, sterile gauze pads, medical tape, antiseptic wipes, pain relievers, tweezers, scissors, instant cold packs, emergency blanket, and emergency contact information. Knowing basic first aid can make a significant difference in emergency situations.",
            None,
            &["first_aid"],
        ),
        builtin(
            "Diabetes Management and Treatment Guidelines",
            "Medical Guidelines Database",
            "Endocrinology",
            "Diabetes is a chronic condition that affects how your body processes blood sugar (glucose). There are two main types: Type 1 diabetes, where the body doesn't produce insulin, and Type 2 diabetes, where the body doesn't use insulin effectively.

Common symptoms include frequent urination, excessive thirst, unexplained weight loss, fatigue, blurred vision, and slow-healing sores. Early detection and proper management are crucial for preventing complications.

Treatment typically involves lifestyle changes, blood sugar monitoring, and medications such as metformin, insulin therapy, or other glucose-lowering drugs. Regular exercise, a balanced diet, and maintaining a healthy weight are essential components of diabetes care.

Complications can include heart disease, stroke, kidney disease, nerve damage, and eye problems. Regular check-ups with healthcare providers are important for monitoring and preventing these complications.",
            Some("Comprehensive guide to diabetes types, symptoms, treatment options, and management strategies."),
            &["diabetes", "blood sugar", "insulin", "chronic condition", "treatment"],
        ),
        builtin(
            "Heart Disease Prevention and Risk Factors",
            "Cardiovascular Health Institute",
            "Cardiology",
            "Heart disease, also known as cardiovascular disease, is the leading cause of death worldwide. It encompasses various conditions affecting the heart and blood vessels, including coronary artery disease, heart attacks, and heart failure.

Major risk factors include high blood pressure, high cholesterol, smoking, diabetes, obesity, physical inactivity, and family history. Age and gender also play significant roles in heart disease risk.

Prevention strategies include maintaining a healthy diet rich in fruits, vegetables, and whole grains, regular physical activity, avoiding tobacco use, managing stress, and controlling blood pressure and cholesterol levels.

Warning signs of a heart attack include chest pain or discomfort, shortness of breath, nausea, lightheadedness, and pain in the arms, back, neck, or jaw. Immediate medical attention is crucial if these symptoms occur.",
            Some("Overview of heart disease risk factors, prevention strategies, and warning signs."),
            &["heart disease", "cardiovascular", "prevention", "risk factors", "heart attack"],
        ),
        builtin(
            "COVID-19 Vaccination Guidelines and Safety Information",
            "CDC and WHO Guidelines",
            "Infectious Diseases",
            "COVID-19 vaccines have been developed and authorized for emergency use to help prevent severe illness, hospitalization, and death from COVID-19. Multiple vaccine types are available, including mRNA vaccines, viral vector vaccines, and protein subunit vaccines.

Vaccination is recommended for all eligible individuals, with priority given to healthcare workers, elderly populations, and those with underlying health conditions. Booster doses are recommended for certain populations to maintain immunity.

Common side effects include pain at the injection site, fatigue, headache, muscle pain, chills, fever, and nausea. These side effects are typically mild and resolve within a few days. Severe allergic reactions are rare but require immediate medical attention.

The vaccines have undergone rigorous testing for safety and efficacy. They significantly reduce the risk of severe COVID-19 and help prevent transmission of the virus to others.",
            Some("Comprehensive information about COVID-19 vaccines, safety, efficacy, and vaccination guidelines."),
            &["covid-19", "vaccination", "immunity", "public health", "pandemic"],
        ),
        builtin(
            "Mental Health and Anxiety Management Strategies",
            "Mental Health Foundation",
            "Mental Health",
            "Mental health is an essential component of overall well-being, affecting how we think, feel, and act. Anxiety disorders are among the most common mental health conditions, affecting millions of people worldwide.

Symptoms of anxiety include excessive worry, restlessness, fatigue, difficulty concentrating, irritability, muscle tension, and sleep disturbances. These symptoms can significantly impact daily functioning and quality of life.

Treatment options include psychotherapy (such as cognitive-behavioral therapy), medications (like selective serotonin reuptake inhibitors), lifestyle modifications, and stress management techniques. Early intervention is crucial for effective treatment.

Self-care strategies include regular exercise, adequate sleep, healthy eating, mindfulness practices, social connections, and avoiding excessive alcohol and caffeine. Professional help should be sought when symptoms persist or interfere with daily life.",
            Some("Guide to understanding anxiety, treatment options, and self-care strategies for mental health."),
            &["mental health", "anxiety", "therapy", "wellness", "stress management"],
        ),
        builtin(
            "Pregnancy Care and Prenatal Health Guidelines",
            "American College of Obstetricians and Gynecologists",
            "Obstetrics",
            "Pregnancy is a transformative period that requires special attention to maternal and fetal health. Proper prenatal care is essential for ensuring a healthy pregnancy and delivery.

Key aspects of prenatal care include regular check-ups with healthcare providers, prenatal vitamins (especially folic acid), proper nutrition, regular exercise, and avoiding harmful substances like alcohol, tobacco, and certain medications.

Common pregnancy symptoms include nausea and vomiting (morning sickness), fatigue, frequent urination, breast tenderness, and mood changes. While most symptoms are normal, some may require medical attention.

Important milestones include the first trimester screening, anatomy ultrasound, glucose tolerance test, and group B strep testing. Regular monitoring helps identify and manage potential complications early.

Warning signs that require immediate medical attention include severe abdominal pain, vaginal bleeding, severe headaches, vision changes, and decreased fetal movement.",
            Some("Comprehensive guide to prenatal care, pregnancy health, and important milestones."),
            &["pregnancy", "prenatal care", "maternal health", "fetal development", "obstetrics"],
        ),
        builtin(
            "Blood Pressure Management and Hypertension Treatment",
            "American Heart Association",
            "Cardiology",
            "Hypertension, or high blood pressure, is a common condition that affects millions of people worldwide. It's often called the \"silent killer\" because it typically has no symptoms but can lead to serious health complications.

Blood pressure is measured in millimeters of mercury (mmHg) and consists of two numbers: systolic pressure (when the heart beats) and diastolic pressure (when the heart rests). Normal blood pressure is less than 120/80 mmHg.

Risk factors for hypertension include age, family history, obesity, physical inactivity, excessive salt intake, alcohol consumption, and stress. Certain medical conditions like diabetes and kidney disease also increase the risk.

Treatment typically involves lifestyle modifications such as the DASH diet, regular exercise, weight management, limiting alcohol and sodium intake, and stress reduction. Medications may include ACE inhibitors, diuretics, beta-blockers, and calcium channel blockers.

Regular monitoring and adherence to treatment plans are essential for preventing complications such as heart disease, stroke, and kidney damage.",
            Some("Comprehensive guide to understanding, preventing, and treating high blood pressure."),
            &["hypertension", "blood pressure", "cardiovascular health", "DASH diet", "medication"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_ids_unique_and_stable() {
        let docs = builtin_documents();
        assert_eq!(docs.len(), 14);
        let ids: HashSet<_> = docs.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids.len(), docs.len());
        assert_eq!(docs[0].id, "builtin:diabetes-symptoms-and-management");
        assert_eq!(docs[2].id, "builtin:emergency-symptoms-when-to-seek-help");
    }

    #[test]
    fn test_builtin_long_documents_have_paragraphs() {
        let docs = builtin_documents();
        let heart = docs
            .iter()
            .find(|d| d.title == "Heart Disease Prevention and Risk Factors")
            .unwrap();
        assert_eq!(heart.category, "Cardiology");
        assert!(heart.body.contains("\n\n"));
        assert!(heart.summary.is_some());
        assert!(heart.tags.contains(&"prevention".to_string()));
    }

    #[test]
    fn test_scan_directory_globs_and_titles() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("nutrition")).unwrap();
        std::fs::write(
            dir.path().join("nutrition/fiber.md"),
            "# Dietary Fiber\n\nFiber supports digestion.",
        )
        .unwrap();
        std::fs::write(dir.path().join("hydration_tips.txt"), "Drink water.").unwrap();
        std::fs::write(dir.path().join("ignore.json"), "{}").unwrap();
        std::fs::write(dir.path().join("draft.md"), "# Draft").unwrap();
        std::fs::write(dir.path().join("empty.md"), "  \n").unwrap();

        let docs = scan_directory(
            dir.path(),
            &["**/*.md".to_string(), "**/*.txt".to_string()],
            &["draft.md".to_string()],
        )
        .unwrap();

        let titles: Vec<_> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["hydration tips", "Dietary Fiber"]);
        assert_eq!(docs[1].category, "nutrition");
        assert_eq!(docs[1].id, "file:nutrition/fiber.md");
        assert_eq!(docs[0].category, "general");
    }

    #[test]
    fn test_scan_missing_root_errors() {
        let err = scan_directory(Path::new("/nonexistent/corpus"), &[], &[]).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_load_documents_respects_builtin_flag() {
        let config = CorpusConfig {
            include_builtin: false,
            ..Default::default()
        };
        assert!(load_documents(&config).unwrap().is_empty());
        assert_eq!(load_documents(&CorpusConfig::default()).unwrap().len(), 14);
    }
}
