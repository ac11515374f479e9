mod aem;
